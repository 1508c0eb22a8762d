//! Access policy for the Tessera evaluator.
//!
//! Decides whether a module may be resolved, a resource read, or one
//! module import another. The evaluator consults the policy before any
//! I/O; nothing in this crate performs reads itself beyond path
//! canonicalization.
//!
//! # Architecture
//!
//! ```text
//! SecurityPolicy (trait)
//!      │
//!      ├── StandardPolicy
//!      │     allowed_modules   : [UriPattern]   prefix-anchored
//!      │     allowed_resources : [UriPattern]
//!      │     trust_levels      : Fn(&Url) -> i32
//!      │     root_dir          : Option<RootDir>
//!      │
//!      └── PermissivePolicy (tests, trusted embedding)
//! ```
//!
//! # Example
//!
//! ```
//! use tessera_auth::{SecurityPolicy, StandardPolicy};
//! use url::Url;
//!
//! let policy = StandardPolicy::default_policy();
//! let base = Url::parse("pkl:base").expect("valid url");
//! let repl = Url::parse("repl:text").expect("valid url");
//! assert!(policy.check_import_module(&repl, &base).is_ok());
//! assert!(policy.check_import_module(&base, &repl).is_err());
//! ```

mod error;
mod pattern;
mod policy;
mod root_dir;
mod standard;
mod trust;

// Re-exports
pub use error::{AccessDenied, PolicyError};
pub use pattern::{compile_all, UriPattern};
pub use policy::{PermissivePolicy, SecurityPolicy};
pub use root_dir::{normalize_lexically, RootDir, SecurePath};
pub use standard::{
    default_allowed_modules, default_allowed_resources, StandardPolicy, StandardPolicyBuilder,
    DEFAULT_ALLOWED_MODULE_PREFIXES, DEFAULT_ALLOWED_RESOURCE_PREFIXES,
};
pub use trust::{default_trust_level, default_trust_levels, TrustLevels};
