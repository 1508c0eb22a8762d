//! `modulepath:` search directories.
//!
//! `modulepath:/lib/a.pkl` is looked up as `<root>/lib/a.pkl` in each
//! root, in order; the first existing file wins. Lookups never leave
//! the root they are resolved against.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tessera_auth::normalize_lexically;
use tessera_types::PathElement;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePathResolver {
    roots: Vec<PathBuf>,
}

impl ModulePathResolver {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots
                .into_iter()
                .map(|r| normalize_lexically(&r.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn candidates<'a>(&'a self, path: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        let relative = path.trim_start_matches('/');
        self.roots.iter().filter_map(move |root| {
            let candidate = normalize_lexically(&root.join(relative));
            candidate.starts_with(root).then_some(candidate)
        })
    }

    /// First file matching `path` across the roots.
    #[must_use]
    pub fn locate(&self, path: &str) -> Option<PathBuf> {
        if path.trim_start_matches('/').is_empty() {
            return None;
        }
        self.candidates(path).find(|c| c.is_file())
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.candidates(path).any(|c| c.exists())
    }

    /// Entries of directory `path` merged across roots; earlier roots shadow later ones.
    #[must_use]
    pub fn list(&self, path: &str) -> Vec<PathElement> {
        let mut merged: BTreeMap<String, bool> = BTreeMap::new();
        for dir in self.candidates(path) {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                merged.entry(name).or_insert(is_dir);
            }
        }
        merged
            .into_iter()
            .map(|(name, is_dir)| PathElement {
                name,
                is_directory: is_dir,
            })
            .collect()
    }
}
