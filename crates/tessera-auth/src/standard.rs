//! The standard allow-list + trust + root-directory policy.
//!
//! # Decision order
//!
//! ```text
//! check_resolve_module / check_read_resource (uri)
//!   │
//!   ├─ no allow-pattern matches a prefix of uri ──► deny (Module/ResourceNotAllowed)
//!   │
//!   ├─ root_dir set and uri is file: ──► resolve path
//!   │     ├─ outside root ──► deny (OutsideRootDir)
//!   │     └─ inside       ──► allow
//!   │
//!   └─ allow
//!
//! check_import_module (importing, imported)
//!   └─ trust(importing) < trust(imported) ──► deny (InsufficientTrust)
//! ```

use crate::error::{AccessDenied, PolicyError};
use crate::pattern::{compile_all, UriPattern};
use crate::policy::SecurityPolicy;
use crate::root_dir::{RootDir, SecurePath};
use crate::trust::{default_trust_levels, TrustLevels};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use url::Url;

/// Module URI prefixes allowed by default.
pub const DEFAULT_ALLOWED_MODULE_PREFIXES: &[&str] = &[
    "repl:",
    "file:",
    "jar:file:",
    "modulepath:",
    "https:",
    "pkl:",
    "package:",
    "projectpackage:",
];

/// Resource URI prefixes allowed by default.
pub const DEFAULT_ALLOWED_RESOURCE_PREFIXES: &[&str] = &[
    "prop:",
    "env:",
    "file:",
    "modulepath:",
    "package:",
    "projectpackage:",
    "https:",
];

/// Default module allow-patterns.
#[must_use]
pub fn default_allowed_modules() -> Vec<UriPattern> {
    DEFAULT_ALLOWED_MODULE_PREFIXES
        .iter()
        .map(|p| UriPattern::prefix(*p))
        .collect()
}

/// Default resource allow-patterns.
#[must_use]
pub fn default_allowed_resources() -> Vec<UriPattern> {
    DEFAULT_ALLOWED_RESOURCE_PREFIXES
        .iter()
        .map(|p| UriPattern::prefix(*p))
        .collect()
}

static DEFAULT_POLICY: LazyLock<StandardPolicy> = LazyLock::new(|| StandardPolicy {
    allowed_modules: default_allowed_modules(),
    allowed_resources: default_allowed_resources(),
    trust_levels: default_trust_levels(),
    root_dir: None,
});

#[derive(Clone, Copy)]
enum Kind {
    Module,
    Resource,
}

/// Allow-list, trust-level and root-directory policy.
///
/// Immutable once built, so one instance may serve many evaluators.
#[derive(Clone)]
pub struct StandardPolicy {
    allowed_modules: Vec<UriPattern>,
    allowed_resources: Vec<UriPattern>,
    trust_levels: TrustLevels,
    root_dir: Option<RootDir>,
}

impl StandardPolicy {
    /// The process-wide default policy (default allow-lists, default trust, no root).
    #[must_use]
    pub fn default_policy() -> &'static StandardPolicy {
        &DEFAULT_POLICY
    }

    /// Starts a builder with empty allow-lists and default trust levels.
    #[must_use]
    pub fn builder() -> StandardPolicyBuilder {
        StandardPolicyBuilder::new()
    }

    #[must_use]
    pub fn allowed_modules(&self) -> &[UriPattern] {
        &self.allowed_modules
    }

    #[must_use]
    pub fn allowed_resources(&self) -> &[UriPattern] {
        &self.allowed_resources
    }

    #[must_use]
    pub fn root_dir(&self) -> Option<&RootDir> {
        self.root_dir.as_ref()
    }

    /// Trust level of `uri` under this policy.
    #[must_use]
    pub fn trust_level(&self, uri: &Url) -> i32 {
        (self.trust_levels)(uri)
    }

    fn check(&self, uri: &Url, kind: Kind) -> Result<(), AccessDenied> {
        let patterns = match kind {
            Kind::Module => &self.allowed_modules,
            Kind::Resource => &self.allowed_resources,
        };
        if !patterns.iter().any(|p| p.matches(uri.as_str())) {
            return Err(match kind {
                Kind::Module => AccessDenied::ModuleNotAllowed {
                    uri: uri.to_string(),
                },
                Kind::Resource => AccessDenied::ResourceNotAllowed {
                    uri: uri.to_string(),
                },
            });
        }
        self.resolve_secure_path(uri).map(|_| ())
    }
}

impl fmt::Debug for StandardPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardPolicy")
            .field("allowed_modules", &self.allowed_modules)
            .field("allowed_resources", &self.allowed_resources)
            .field("root_dir", &self.root_dir)
            .finish_non_exhaustive()
    }
}

impl SecurityPolicy for StandardPolicy {
    fn check_resolve_module(&self, uri: &Url) -> Result<(), AccessDenied> {
        self.check(uri, Kind::Module)
    }

    fn check_read_resource(&self, uri: &Url) -> Result<(), AccessDenied> {
        self.check(uri, Kind::Resource)
    }

    fn check_import_module(&self, importing: &Url, imported: &Url) -> Result<(), AccessDenied> {
        if self.trust_level(importing) < self.trust_level(imported) {
            return Err(AccessDenied::InsufficientTrust {
                importing: importing.to_string(),
                imported: imported.to_string(),
            });
        }
        Ok(())
    }

    fn resolve_secure_path(&self, uri: &Url) -> Result<Option<SecurePath>, AccessDenied> {
        let Some(root) = &self.root_dir else {
            return Ok(None);
        };
        if uri.scheme() != "file" {
            return Ok(None);
        }
        let outside = || AccessDenied::OutsideRootDir {
            uri: uri.to_string(),
            root: root.path().display().to_string(),
        };
        // A file URI with a remote host has no local path.
        let path = uri.to_file_path().map_err(|()| outside())?;
        match root.contain(&path) {
            Ok(Some(secure)) => Ok(Some(secure)),
            Ok(None) => Err(outside()),
            Err(e) => Err(AccessDenied::PathResolution {
                uri: uri.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

// ─── Builder ────────────────────────────────────────────────────────

/// Collects allow-lists, trust levels and an optional root before building.
///
/// # Example
///
/// ```
/// use tessera_auth::{SecurityPolicy, StandardPolicy};
/// use url::Url;
///
/// let policy = StandardPolicy::builder()
///     .with_allowed_module_patterns(["repl:", "pkl:"])
///     .expect("patterns compile")
///     .build()
///     .expect("policy is valid");
///
/// let denied = Url::parse("file:///etc/passwd").expect("valid url");
/// assert!(policy.check_resolve_module(&denied).is_err());
/// ```
#[derive(Clone)]
pub struct StandardPolicyBuilder {
    allowed_modules: Vec<UriPattern>,
    allowed_resources: Vec<UriPattern>,
    trust_levels: TrustLevels,
    root_dir: Option<PathBuf>,
}

impl Default for StandardPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardPolicyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_modules: Vec::new(),
            allowed_resources: Vec::new(),
            trust_levels: default_trust_levels(),
            root_dir: None,
        }
    }

    /// A builder pre-filled with the default allow-lists.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .with_allowed_modules(default_allowed_modules())
            .with_allowed_resources(default_allowed_resources())
    }

    #[must_use]
    pub fn with_allowed_modules(mut self, patterns: impl IntoIterator<Item = UriPattern>) -> Self {
        self.allowed_modules.extend(patterns);
        self
    }

    #[must_use]
    pub fn with_allowed_resources(
        mut self,
        patterns: impl IntoIterator<Item = UriPattern>,
    ) -> Self {
        self.allowed_resources.extend(patterns);
        self
    }

    /// Compiles and appends module allow-patterns.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPattern`] for the first bad expression.
    pub fn with_allowed_module_patterns<I, S>(self, patterns: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.with_allowed_modules(compile_all(patterns)?))
    }

    /// Compiles and appends resource allow-patterns.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPattern`] for the first bad expression.
    pub fn with_allowed_resource_patterns<I, S>(self, patterns: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.with_allowed_resources(compile_all(patterns)?))
    }

    /// Replaces the module allow-list.
    pub fn set_allowed_modules(&mut self, patterns: Vec<UriPattern>) {
        self.allowed_modules = patterns;
    }

    /// Replaces the resource allow-list.
    pub fn set_allowed_resources(&mut self, patterns: Vec<UriPattern>) {
        self.allowed_resources = patterns;
    }

    #[must_use]
    pub fn with_trust_levels(mut self, trust_levels: TrustLevels) -> Self {
        self.trust_levels = trust_levels;
        self
    }

    #[must_use]
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root_dir.into());
        self
    }

    pub fn set_root_dir(&mut self, root_dir: Option<PathBuf>) {
        self.root_dir = root_dir;
    }

    #[must_use]
    pub fn allowed_modules(&self) -> &[UriPattern] {
        &self.allowed_modules
    }

    #[must_use]
    pub fn allowed_resources(&self) -> &[UriPattern] {
        &self.allowed_resources
    }

    #[must_use]
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    /// Builds the policy, normalizing the root directory.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::Empty`] if both allow-lists are empty
    /// - [`PolicyError::RootDir`] if the root cannot be normalized
    pub fn build(self) -> Result<StandardPolicy, PolicyError> {
        if self.allowed_modules.is_empty() && self.allowed_resources.is_empty() {
            return Err(PolicyError::Empty);
        }
        let root_dir = self
            .root_dir
            .map(|path| {
                RootDir::new(&path).map_err(|source| PolicyError::RootDir {
                    path: path.display().to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(StandardPolicy {
            allowed_modules: self.allowed_modules,
            allowed_resources: self.allowed_resources,
            trust_levels: self.trust_levels,
            root_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("should parse url")
    }

    #[test]
    fn default_policy_allows_default_schemes() {
        let p = StandardPolicy::default_policy();
        for uri in [
            "repl:text",
            "file:///tmp/a.pkl",
            "jar:file:/lib.jar!/a.pkl",
            "modulepath:/a.pkl",
            "https://example.com/a.pkl",
            "pkl:base",
            "package://pkg.example/foo@1.0.0#/a.pkl",
            "projectpackage://pkg.example/foo@1.0.0#/a.pkl",
        ] {
            assert!(p.check_resolve_module(&url(uri)).is_ok(), "should allow {uri}");
        }
    }

    #[test]
    fn default_policy_denies_http_modules() {
        let p = StandardPolicy::default_policy();
        let err = p
            .check_resolve_module(&url("http://example.com/a.pkl"))
            .expect_err("should deny plain http");
        assert!(matches!(err, AccessDenied::ModuleNotAllowed { .. }));
        assert!(err.to_string().contains("http://example.com/a.pkl"));
    }

    #[test]
    fn default_resources_allow_env_and_prop() {
        let p = StandardPolicy::default_policy();
        assert!(p.check_read_resource(&url("env:HOME")).is_ok());
        assert!(p.check_read_resource(&url("prop:user")).is_ok());
        assert!(p.check_read_resource(&url("pkl:base")).is_err());
    }

    #[test]
    fn restricted_module_list_denies_file() {
        let p = StandardPolicy::builder()
            .with_allowed_module_patterns(["repl:", "pkl:"])
            .expect("should compile")
            .build()
            .expect("should build");
        let err = p
            .check_resolve_module(&url("file:///etc/passwd"))
            .expect_err("should deny");
        assert_eq!(
            err,
            AccessDenied::ModuleNotAllowed {
                uri: "file:///etc/passwd".into()
            }
        );
    }

    #[test]
    fn stdlib_importing_repl_is_denied() {
        let p = StandardPolicy::default_policy();
        let err = p
            .check_import_module(&url("pkl:base"), &url("repl:text"))
            .expect_err("should deny");
        let msg = err.to_string();
        assert!(msg.contains("pkl:base") && msg.contains("repl:text"), "got: {msg}");
        assert!(p
            .check_import_module(&url("repl:text"), &url("pkl:base"))
            .is_ok());
    }

    #[test]
    fn custom_trust_levels_are_used() {
        let p = StandardPolicy::builder()
            .with_allowed_modules(default_allowed_modules())
            .with_trust_levels(Arc::new(|u: &Url| if u.scheme() == "pkl" { 100 } else { 1 }))
            .build()
            .expect("should build");
        assert!(p
            .check_import_module(&url("pkl:base"), &url("repl:text"))
            .is_ok());
        assert!(p
            .check_import_module(&url("repl:text"), &url("pkl:base"))
            .is_err());
    }

    #[test]
    fn empty_lists_fail_to_build() {
        let err = StandardPolicy::builder()
            .build()
            .expect_err("should reject empty policy");
        assert!(matches!(err, PolicyError::Empty));
    }

    #[test]
    fn one_nonempty_list_is_enough() {
        assert!(StandardPolicy::builder()
            .with_allowed_resources(default_allowed_resources())
            .build()
            .is_ok());
    }

    #[test]
    fn root_dir_denies_outside_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let p = StandardPolicyBuilder::with_defaults()
            .with_root_dir(dir.path())
            .build()
            .expect("should build");
        let err = p
            .check_resolve_module(&url("file:///etc/passwd"))
            .expect_err("should deny");
        assert!(matches!(err, AccessDenied::OutsideRootDir { .. }));
        assert!(err.to_string().contains("file:///etc/passwd"));
    }

    #[test]
    fn root_dir_allows_inside_file_and_other_schemes() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let file = dir.path().join("a.pkl");
        std::fs::write(&file, "a = 1").expect("should write");
        let p = StandardPolicyBuilder::with_defaults()
            .with_root_dir(dir.path())
            .build()
            .expect("should build");
        let uri = Url::from_file_path(&file).expect("should convert");
        assert!(p.check_resolve_module(&uri).is_ok());
        assert!(p.check_read_resource(&uri).is_ok());
        assert!(p.check_resolve_module(&url("pkl:base")).is_ok());
        assert!(p.check_read_resource(&url("env:HOME")).is_ok());
    }

    #[test]
    fn root_dir_denies_file_uri_with_host() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let p = StandardPolicyBuilder::with_defaults()
            .with_root_dir(dir.path())
            .build()
            .expect("should build");
        assert!(p
            .check_resolve_module(&url("file://server/share/a.pkl"))
            .is_err());
    }

    #[test]
    fn resolve_secure_path_without_root_is_none() {
        let p = StandardPolicy::default_policy();
        assert!(p
            .resolve_secure_path(&url("file:///etc/passwd"))
            .expect("should not deny")
            .is_none());
    }

    #[test]
    fn resolve_secure_path_returns_real_path() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let file = dir.path().join("b.pkl");
        std::fs::write(&file, "b = 2").expect("should write");
        let p = StandardPolicyBuilder::with_defaults()
            .with_root_dir(dir.path())
            .build()
            .expect("should build");
        let uri = Url::from_file_path(&file).expect("should convert");
        let secure = p
            .resolve_secure_path(&uri)
            .expect("should allow")
            .expect("should have a path");
        assert_eq!(
            secure.as_path(),
            file.canonicalize().expect("should canonicalize")
        );
    }

    mod proptest_policy {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn unlisted_schemes_are_denied(scheme in "x[a-z]{2,8}", rest in "[a-z0-9/]{0,12}") {
                let p = StandardPolicy::default_policy();
                let uri = url(&format!("{scheme}:{rest}"));
                prop_assert!(p.check_resolve_module(&uri).is_err());
                prop_assert!(p.check_read_resource(&uri).is_err());
            }

            #[test]
            fn import_allowed_iff_trust_not_lower(a in -50i32..50, b in -50i32..50) {
                let p = StandardPolicyBuilder::with_defaults()
                    .with_trust_levels(Arc::new(move |u: &Url| {
                        if u.scheme() == "left" { a } else { b }
                    }))
                    .build()
                    .expect("should build");
                let result = p.check_import_module(&url("left:x"), &url("right:y"));
                prop_assert_eq!(result.is_ok(), a >= b);
            }
        }
    }
}
