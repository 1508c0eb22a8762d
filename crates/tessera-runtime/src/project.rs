//! Project descriptors.
//!
//! A project file is TOML with camelCase keys. Every setting is
//! optional; an absent setting leaves the evaluator builder's value
//! untouched.
//!
//! ```toml
//! [evaluatorSettings]
//! allowedModules = ["file:", "pkl:"]
//! timeoutMs = 30000
//! modulePath = ["lib"]
//! rootDir = "."
//!
//! [evaluatorSettings.externalModuleReaders.ext]
//! executable = "ext-reader"
//! arguments = ["--quiet"]
//!
//! [dependencies.birds]
//! uri = "package://pkg.example/birds@1.2.0"
//!
//! [dependencies.fruit]
//! uri = "package://pkg.example/fruit@1.0.0"
//! path = "../fruit"
//! ```
//!
//! Relative paths are resolved against the directory holding the
//! project file when loaded with [`Project::load`].

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Conventional project file name.
pub const PROJECT_FILE_NAME: &str = "Project.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub evaluator_settings: EvaluatorSettings,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorSettings {
    pub allowed_modules: Option<Vec<String>>,
    pub allowed_resources: Option<Vec<String>>,
    pub external_properties: Option<BTreeMap<String, String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub timeout_ms: Option<u64>,
    pub module_path: Option<Vec<PathBuf>>,
    pub root_dir: Option<PathBuf>,
    pub color: Option<bool>,
    pub no_cache: Option<bool>,
    pub module_cache_dir: Option<PathBuf>,
    pub external_module_readers: Option<BTreeMap<String, ExternalReaderCommand>>,
    pub external_resource_readers: Option<BTreeMap<String, ExternalReaderCommand>>,
    pub http: Option<HttpProjectSettings>,
}

impl EvaluatorSettings {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// How to start an external reader process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReaderCommand {
    pub executable: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl ExternalReaderCommand {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Command line for logs and errors.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.executable.display().to_string())
            .chain(self.arguments.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProjectSettings {
    pub proxy: Option<ProxySettings>,
    pub rewrites: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    pub address: Option<String>,
    pub no_proxy: Option<Vec<String>>,
}

/// A `[dependencies.<name>]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    /// Package URI including version, e.g. `package://pkg.example/birds@1.2.0`.
    pub uri: String,
    /// Local project directory standing in for the package.
    pub path: Option<PathBuf>,
}

impl Project {
    /// Parses a project from TOML text. Relative paths are kept as written.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseProject`] on malformed TOML or unknown value types.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::parse_project("<inline>", e))
    }

    /// Loads a project file, or `Project.toml` inside a directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadProject`] or [`ConfigError::ParseProject`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(PROJECT_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        let text =
            std::fs::read_to_string(&file).map_err(|e| ConfigError::read_project(&file, e))?;
        let mut project: Project = toml::from_str(&text)
            .map_err(|e| ConfigError::parse_project(file.display().to_string(), e))?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dir = std::path::absolute(&dir).map_err(|e| ConfigError::read_project(&file, e))?;
        project.resolve_paths(&dir);
        project.project_dir = Some(dir);
        tracing::debug!(file = %file.display(), "loaded project");
        Ok(project)
    }

    fn resolve_paths(&mut self, dir: &Path) {
        let settings = &mut self.evaluator_settings;
        if let Some(paths) = &mut settings.module_path {
            for p in paths.iter_mut() {
                *p = dir.join(&*p);
            }
        }
        for slot in [&mut settings.root_dir, &mut settings.module_cache_dir] {
            if let Some(p) = slot {
                *p = dir.join(&*p);
            }
        }
        for dep in self.dependencies.values_mut() {
            if let Some(p) = &mut dep.path {
                *p = dir.join(&*p);
            }
        }
    }

    /// The dependency table keyed by package base URI.
    #[must_use]
    pub fn declared_dependencies(&self) -> DeclaredDependencies {
        let mut deps = DeclaredDependencies::default();
        for spec in self.dependencies.values() {
            let dependency = match &spec.path {
                Some(dir) => Dependency::Local {
                    project_dir: dir.clone(),
                },
                None => Dependency::Remote {
                    uri: spec.uri.clone(),
                },
            };
            deps.insert(&spec.uri, dependency);
        }
        deps
    }
}

// ─── Declared dependencies ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Served from a local project directory.
    Local { project_dir: PathBuf },
    /// Served from the package cache under this versioned URI.
    Remote { uri: String },
}

/// Maps package base URIs (`package://host/path`, version stripped)
/// to what should serve them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredDependencies {
    entries: BTreeMap<String, Dependency>,
}

/// `package://host/path@1.2.0#/x` → `package://host/path`.
#[must_use]
pub fn package_base(uri: &str) -> &str {
    let without_fragment = uri.split('#').next().unwrap_or(uri);
    match without_fragment.rfind('@') {
        Some(at) => &without_fragment[..at],
        None => without_fragment,
    }
}

impl DeclaredDependencies {
    pub fn insert(&mut self, package_uri: &str, dependency: Dependency) {
        self.entries
            .insert(package_base(package_uri).to_string(), dependency);
    }

    /// Looks up a package or project-package URI (scheme-insensitive).
    #[must_use]
    pub fn get(&self, uri: &str) -> Option<&Dependency> {
        let normalized = uri
            .strip_prefix("projectpackage:")
            .map_or_else(|| uri.to_string(), |rest| format!("package:{rest}"));
        self.entries.get(package_base(&normalized))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
