//! Concrete module keys.

use super::module_path::ModulePathResolver;
use super::package::PackageAssetUri;
use super::stdlib::standard_library_module;
use super::{ModuleKey, ResolveContext, ResolvedModule};
use crate::error::ResolveError;
use crate::external::ExternalReader;
use crate::project::Dependency;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_auth::normalize_lexically;
use tessera_types::PathElement;
use url::Url;

fn file_url(path: &Path) -> Result<Url, ResolveError> {
    Url::from_file_path(path)
        .map_err(|()| ResolveError::invalid_uri(path.display(), "not an absolute file path"))
}

fn read_dir_elements(uri: &Url, dir: &Path) -> Result<Vec<PathElement>, ResolveError> {
    let mut elements = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ResolveError::io(uri, e))? {
        let entry = entry.map_err(|e| ResolveError::io(uri, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry
            .file_type()
            .map_err(|e| ResolveError::io(uri, e))?
            .is_dir();
        elements.push(if is_dir {
            PathElement::directory(name)
        } else {
            PathElement::file(name)
        });
    }
    elements.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(elements)
}

// ─── Synthetic ──────────────────────────────────────────────────────

/// Inline text under the REPL URI. Never touches a backend or the policy.
#[derive(Debug)]
pub struct SyntheticKey {
    uri: Url,
    text: Arc<str>,
}

impl SyntheticKey {
    #[must_use]
    pub fn new(uri: Url, text: impl Into<Arc<str>>) -> Self {
        Self {
            uri,
            text: text.into(),
        }
    }
}

impl ModuleKey for SyntheticKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, _ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        Ok(ResolvedModule::with_text(
            self.uri.clone(),
            self.uri.clone(),
            Arc::clone(&self.text),
        ))
    }

    fn is_cached(&self) -> bool {
        false
    }

    fn is_local(&self) -> bool {
        true
    }
}

// ─── FixedText ──────────────────────────────────────────────────────

/// Serves caller-supplied text under a real key's URI without re-reading it.
#[derive(Debug)]
pub struct FixedTextKey {
    inner: Arc<dyn ModuleKey>,
    text: Arc<str>,
}

impl FixedTextKey {
    #[must_use]
    pub fn new(inner: Arc<dyn ModuleKey>, text: impl Into<Arc<str>>) -> Self {
        Self {
            inner,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<dyn ModuleKey> {
        &self.inner
    }
}

impl ModuleKey for FixedTextKey {
    fn uri(&self) -> &Url {
        self.inner.uri()
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        let uri = self.inner.uri();
        ctx.policy().check_resolve_module(uri)?;
        Ok(ResolvedModule::with_text(
            uri.clone(),
            uri.clone(),
            Arc::clone(&self.text),
        ))
    }

    fn is_cached(&self) -> bool {
        false
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    fn has_element(&self, ctx: &ResolveContext, uri: &Url) -> Result<bool, ResolveError> {
        self.inner.has_element(ctx, uri)
    }

    fn list_elements(
        &self,
        ctx: &ResolveContext,
        uri: &Url,
    ) -> Result<Vec<PathElement>, ResolveError> {
        self.inner.list_elements(ctx, uri)
    }
}

// ─── Standard library ───────────────────────────────────────────────

/// A `pkl:` module compiled into the engine.
#[derive(Debug)]
pub struct StandardLibraryKey {
    uri: Url,
}

impl StandardLibraryKey {
    #[must_use]
    pub fn new(uri: Url) -> Self {
        Self { uri }
    }
}

impl ModuleKey for StandardLibraryKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let text = standard_library_module(self.uri.path())
            .ok_or_else(|| ResolveError::not_found(&self.uri))?;
        Ok(ResolvedModule::with_text(
            self.uri.clone(),
            self.uri.clone(),
            text,
        ))
    }

    fn is_local(&self) -> bool {
        true
    }
}

// ─── File ───────────────────────────────────────────────────────────

/// A `file:` module.
///
/// The policy is checked on the requested URI and again on the real
/// path, so a symlink cannot smuggle an outside file past the root.
#[derive(Debug)]
pub struct FileKey {
    uri: Url,
}

impl FileKey {
    #[must_use]
    pub fn new(uri: Url) -> Self {
        Self { uri }
    }

    fn path(&self, uri: &Url) -> Result<PathBuf, ResolveError> {
        uri.to_file_path()
            .map_err(|()| ResolveError::invalid_uri(uri, "not a local file path"))
    }
}

impl ModuleKey for FileKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let path = self.path(&self.uri)?;
        let real = path
            .canonicalize()
            .map_err(|e| ResolveError::io(&self.uri, e))?;
        let real_uri = file_url(&real)?;
        if real_uri != self.uri {
            ctx.policy().check_resolve_module(&real_uri)?;
        }
        let display = self.uri.to_string();
        Ok(ResolvedModule::deferred(
            self.uri.clone(),
            real_uri,
            move || std::fs::read_to_string(&real).map_err(|e| ResolveError::io(display, e)),
        ))
    }

    fn is_local(&self) -> bool {
        true
    }

    fn has_element(&self, ctx: &ResolveContext, uri: &Url) -> Result<bool, ResolveError> {
        ctx.policy().check_resolve_module(uri)?;
        Ok(self.path(uri)?.exists())
    }

    fn list_elements(
        &self,
        ctx: &ResolveContext,
        uri: &Url,
    ) -> Result<Vec<PathElement>, ResolveError> {
        ctx.policy().check_resolve_module(uri)?;
        read_dir_elements(uri, &self.path(uri)?)
    }
}

// ─── Module path ────────────────────────────────────────────────────

/// A `modulepath:` module found in the first matching search directory.
#[derive(Debug)]
pub struct ModulePathKey {
    uri: Url,
    resolver: Arc<ModulePathResolver>,
}

impl ModulePathKey {
    #[must_use]
    pub fn new(uri: Url, resolver: Arc<ModulePathResolver>) -> Self {
        Self { uri, resolver }
    }
}

impl ModuleKey for ModulePathKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let path = self
            .resolver
            .locate(self.uri.path())
            .ok_or_else(|| ResolveError::not_found(&self.uri))?;
        let display = self.uri.to_string();
        Ok(ResolvedModule::deferred(
            self.uri.clone(),
            self.uri.clone(),
            move || std::fs::read_to_string(&path).map_err(|e| ResolveError::io(display, e)),
        ))
    }

    fn is_local(&self) -> bool {
        true
    }

    fn has_element(&self, ctx: &ResolveContext, uri: &Url) -> Result<bool, ResolveError> {
        ctx.policy().check_resolve_module(uri)?;
        Ok(self.resolver.exists(uri.path()))
    }

    fn list_elements(
        &self,
        ctx: &ResolveContext,
        uri: &Url,
    ) -> Result<Vec<PathElement>, ResolveError> {
        ctx.policy().check_resolve_module(uri)?;
        Ok(self.resolver.list(uri.path()))
    }
}

// ─── HTTP ───────────────────────────────────────────────────────────

/// An `http:`/`https:` module.
///
/// A redirect target is checked against the policy too, but the module
/// keeps the URI that was requested.
#[derive(Debug)]
pub struct HttpKey {
    uri: Url,
}

impl HttpKey {
    #[must_use]
    pub fn new(uri: Url) -> Self {
        Self { uri }
    }
}

impl ModuleKey for HttpKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let response = ctx.http().get(&self.uri)?;
        if response.uri != self.uri {
            ctx.policy().check_resolve_module(&response.uri)?;
        }
        let text = String::from_utf8(response.body).map_err(|_| ResolveError::Http {
            uri: self.uri.to_string(),
            reason: "response body is not valid UTF-8".into(),
        })?;
        Ok(ResolvedModule::with_text(
            self.uri.clone(),
            self.uri.clone(),
            text,
        ))
    }
}

// ─── Packages ───────────────────────────────────────────────────────

/// A `package:` asset served from the module cache.
#[derive(Debug)]
pub struct PackageKey {
    uri: Url,
    asset: PackageAssetUri,
}

impl PackageKey {
    #[must_use]
    pub fn new(uri: Url, asset: PackageAssetUri) -> Self {
        Self { uri, asset }
    }
}

impl ModuleKey for PackageKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let text = ctx.packages().read_text(&self.asset)?;
        Ok(ResolvedModule::with_text(
            self.uri.clone(),
            self.uri.clone(),
            text,
        ))
    }

    fn list_elements(
        &self,
        ctx: &ResolveContext,
        uri: &Url,
    ) -> Result<Vec<PathElement>, ResolveError> {
        ctx.policy().check_resolve_module(uri)?;
        ctx.packages().list(&PackageAssetUri::parse(uri)?)
    }
}

/// A `projectpackage:` asset served through the declared dependencies.
#[derive(Debug)]
pub struct ProjectPackageKey {
    uri: Url,
    asset: PackageAssetUri,
}

impl ProjectPackageKey {
    #[must_use]
    pub fn new(uri: Url, asset: PackageAssetUri) -> Self {
        Self { uri, asset }
    }
}

impl ModuleKey for ProjectPackageKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let text = read_project_package(ctx, &self.uri, &self.asset)?;
        Ok(ResolvedModule::with_text(
            self.uri.clone(),
            self.uri.clone(),
            String::from_utf8(text).map_err(|_| {
                ResolveError::package(&self.uri, "asset is not valid UTF-8")
            })?,
        ))
    }
}

/// Reads a project-package asset from its local directory or the cache.
pub(crate) fn read_project_package(
    ctx: &ResolveContext,
    uri: &Url,
    asset: &PackageAssetUri,
) -> Result<Vec<u8>, ResolveError> {
    let deps = ctx
        .dependencies()
        .ok_or_else(|| ResolveError::package(uri, "no project dependencies are declared"))?;
    match deps.get(uri.as_str()) {
        None => Err(ResolveError::package(
            uri,
            "package is not a declared project dependency",
        )),
        Some(Dependency::Local { project_dir }) => {
            let dir = normalize_lexically(project_dir);
            let path = normalize_lexically(&dir.join(asset.asset.trim_start_matches('/')));
            if !path.starts_with(&dir) {
                return Err(ResolveError::package(uri, "asset path escapes the project"));
            }
            std::fs::read(&path).map_err(|e| ResolveError::io(uri, e))
        }
        Some(Dependency::Remote { uri: package }) => {
            let remote = PackageAssetUri::parse_str(&format!("{package}#{}", asset.asset))?;
            ctx.packages().read_bytes(&remote)
        }
    }
}

// ─── External ───────────────────────────────────────────────────────

/// A module served by an external reader process.
#[derive(Debug)]
pub struct ExternalModuleKey {
    uri: Url,
    reader: ExternalReader,
}

impl ExternalModuleKey {
    #[must_use]
    pub fn new(uri: Url, reader: ExternalReader) -> Self {
        Self { uri, reader }
    }
}

impl ModuleKey for ExternalModuleKey {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError> {
        ctx.policy().check_resolve_module(&self.uri)?;
        let text = self
            .reader
            .bridge()
            .and_then(|bridge| bridge.read_module(&self.uri, ctx.interrupt()))
            .map_err(|e| ResolveError::external(&self.uri, e))?;
        Ok(ResolvedModule::with_text(
            self.uri.clone(),
            self.uri.clone(),
            text,
        ))
    }

    fn has_element(&self, ctx: &ResolveContext, uri: &Url) -> Result<bool, ResolveError> {
        let Some(name) = uri.path_segments().and_then(|mut s| s.next_back()) else {
            return Ok(false);
        };
        let name = name.to_string();
        let parent = uri
            .join("./")
            .map_err(|e| ResolveError::invalid_uri(uri, e))?;
        Ok(self
            .list_elements(ctx, &parent)?
            .iter()
            .any(|e| e.name == name))
    }

    fn list_elements(
        &self,
        ctx: &ResolveContext,
        uri: &Url,
    ) -> Result<Vec<PathElement>, ResolveError> {
        ctx.policy().check_resolve_module(uri)?;
        self.reader
            .bridge()
            .and_then(|bridge| bridge.list_modules(uri, ctx.interrupt()))
            .map_err(|e| ResolveError::external(uri, e))
    }
}
