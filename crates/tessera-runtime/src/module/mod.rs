//! Module keys, factories and the resolver chain.
//!
//! # Architecture
//!
//! ```text
//! ModuleSource ──► ModuleResolver ──► [ModuleKeyFactory, ...]  (first Some wins)
//!                                             │
//!                                             ▼
//!                                       Arc<dyn ModuleKey>
//!                                             │ resolve(&ResolveContext)
//!                                             ▼
//!                                       ResolvedModule { original, resolved, text }
//! ```
//!
//! Keys are cheap identities; they do no I/O until `resolve`. Every key
//! that touches a backend checks the policy in [`ResolveContext`] first.

pub mod factories;
mod keys;
mod module_path;
mod package;
mod resolver;
mod stdlib;

use crate::error::ResolveError;
use crate::http::HttpClient;
use crate::interrupt::Interrupt;
use crate::project::DeclaredDependencies;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_auth::SecurityPolicy;
use tessera_types::PathElement;
use url::Url;

pub(crate) use keys::read_project_package;
pub use keys::{
    ExternalModuleKey, FileKey, FixedTextKey, HttpKey, ModulePathKey, PackageKey,
    ProjectPackageKey, StandardLibraryKey, SyntheticKey,
};
pub use module_path::ModulePathResolver;
pub use package::{PackageAssetUri, PackageResolver};
pub use resolver::{parse_absolute, ModuleResolver};
pub use stdlib::{standard_library_module, STANDARD_LIBRARY_MODULES};

// ─── ResolveContext ─────────────────────────────────────────────────

/// Everything a key or resource reader may consult while resolving.
///
/// Owned by the evaluator session; cloned into backends as needed.
#[derive(Clone)]
pub struct ResolveContext {
    policy: Arc<dyn SecurityPolicy>,
    http: Arc<HttpClient>,
    packages: Arc<PackageResolver>,
    dependencies: Option<Arc<DeclaredDependencies>>,
    env: Arc<BTreeMap<String, String>>,
    properties: Arc<BTreeMap<String, String>>,
    interrupt: Interrupt,
}

impl fmt::Debug for ResolveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveContext")
            .field("policy", &self.policy)
            .field("packages", &self.packages)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl ResolveContext {
    /// A context with a direct HTTP client, no package cache and empty maps.
    #[must_use]
    pub fn new(policy: Arc<dyn SecurityPolicy>) -> Self {
        Self {
            policy,
            http: Arc::new(HttpClient::default()),
            packages: Arc::new(PackageResolver::new(None)),
            dependencies: None,
            env: Arc::default(),
            properties: Arc::default(),
            interrupt: Interrupt::new(),
        }
    }

    #[must_use]
    pub fn with_http(mut self, http: Arc<HttpClient>) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_packages(mut self, packages: Arc<PackageResolver>) -> Self {
        self.packages = packages;
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Option<Arc<DeclaredDependencies>>) -> Self {
        self.dependencies = dependencies;
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Arc::new(env);
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = Arc::new(properties);
        self
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &dyn SecurityPolicy {
        self.policy.as_ref()
    }

    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    #[must_use]
    pub fn packages(&self) -> &PackageResolver {
        &self.packages
    }

    #[must_use]
    pub fn dependencies(&self) -> Option<&DeclaredDependencies> {
        self.dependencies.as_deref()
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

// ─── ResolvedModule ─────────────────────────────────────────────────

type Loader = Box<dyn FnOnce() -> Result<String, ResolveError> + Send>;

enum TextState {
    Loaded(Arc<str>),
    Pending(Loader),
    Taken,
}

/// A resolved module: its identity and lazily loaded text.
///
/// `original` is the URI the caller asked for; `resolved` is where the
/// text actually lives (real path, or the same URI). Relative imports
/// are joined against `resolved`.
pub struct ResolvedModule {
    original: Url,
    resolved: Url,
    text: Mutex<TextState>,
}

impl fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModule")
            .field("original", &self.original.as_str())
            .field("resolved", &self.resolved.as_str())
            .finish_non_exhaustive()
    }
}

impl ResolvedModule {
    #[must_use]
    pub fn with_text(original: Url, resolved: Url, text: impl Into<Arc<str>>) -> Self {
        Self {
            original,
            resolved,
            text: Mutex::new(TextState::Loaded(text.into())),
        }
    }

    /// Text is read by `loader` on first [`text`](Self::text) call.
    #[must_use]
    pub fn deferred(
        original: Url,
        resolved: Url,
        loader: impl FnOnce() -> Result<String, ResolveError> + Send + 'static,
    ) -> Self {
        Self {
            original,
            resolved,
            text: Mutex::new(TextState::Pending(Box::new(loader))),
        }
    }

    #[must_use]
    pub fn original_uri(&self) -> &Url {
        &self.original
    }

    #[must_use]
    pub fn resolved_uri(&self) -> &Url {
        &self.resolved
    }

    /// Loads the text once; later calls return the same text.
    ///
    /// # Errors
    ///
    /// Returns the loader's error. A failed load is not retried.
    pub fn text(&self) -> Result<Arc<str>, ResolveError> {
        let mut state = self.text.lock();
        match std::mem::replace(&mut *state, TextState::Taken) {
            TextState::Loaded(text) => {
                *state = TextState::Loaded(Arc::clone(&text));
                Ok(text)
            }
            TextState::Pending(loader) => {
                let text: Arc<str> = loader()?.into();
                *state = TextState::Loaded(Arc::clone(&text));
                Ok(text)
            }
            TextState::Taken => Err(ResolveError::Io {
                uri: self.original.to_string(),
                source: std::io::Error::other("module text failed to load earlier"),
            }),
        }
    }
}

// ─── ModuleKey ──────────────────────────────────────────────────────

/// Identity of a module before any I/O.
pub trait ModuleKey: Send + Sync + fmt::Debug {
    fn uri(&self) -> &Url;

    /// Checks the policy and locates the module's text.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Denied`] before any I/O if the policy rejects
    /// the URI, or a backend error tagged with the URI.
    fn resolve(&self, ctx: &ResolveContext) -> Result<ResolvedModule, ResolveError>;

    /// Whether evaluated instances may be cached per resolved URI.
    fn is_cached(&self) -> bool {
        true
    }

    /// Whether the module lives on this machine.
    fn is_local(&self) -> bool {
        false
    }

    /// Whether `uri` (hierarchically under this key's scheme) exists.
    ///
    /// # Errors
    ///
    /// Returns a backend error; the default never fails.
    fn has_element(&self, ctx: &ResolveContext, uri: &Url) -> Result<bool, ResolveError> {
        let _ = (ctx, uri);
        Ok(false)
    }

    /// Lists entries of the directory-like `uri`, for glob imports.
    ///
    /// # Errors
    ///
    /// Returns a backend error; the default never fails.
    fn list_elements(
        &self,
        ctx: &ResolveContext,
        uri: &Url,
    ) -> Result<Vec<PathElement>, ResolveError> {
        let _ = (ctx, uri);
        Ok(Vec::new())
    }
}

// ─── ModuleKeyFactory ───────────────────────────────────────────────

/// One backend in the resolver chain.
pub trait ModuleKeyFactory: Send + Sync + fmt::Debug {
    /// Claims `uri` with `Some`, or declines with `None` so the next factory is tried.
    ///
    /// # Errors
    ///
    /// An error stops the chain; it is not treated as a decline.
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError>;

    /// Releases backend resources. Called best-effort on session close.
    ///
    /// # Errors
    ///
    /// Returns a backend error; callers log and continue.
    fn close(&self) -> Result<(), ResolveError> {
        Ok(())
    }
}
