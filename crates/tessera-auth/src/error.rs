//! Access-denied and policy-construction errors.
//!
//! Every denial names the offending URI. Import denials name both sides:
//!
//! ```text
//! check_resolve_module ──► ModuleNotAllowed   { uri }
//! check_read_resource  ──► ResourceNotAllowed { uri }
//!        (either)      ──► OutsideRootDir     { uri, root }
//! check_import_module  ──► InsufficientTrust  { importing, imported }
//! ```

use tessera_types::ErrorCode;
use thiserror::Error;

/// A policy rejected a resolve, read, or import.
///
/// Never retried and never downgraded to an allow.
///
/// # Example
///
/// ```
/// use tessera_auth::AccessDenied;
/// use tessera_types::ErrorCode;
///
/// let err = AccessDenied::ModuleNotAllowed { uri: "bogus:x".into() };
/// assert!(err.to_string().contains("bogus:x"));
/// assert_eq!(err.code(), "ACCESS_MODULE_NOT_ALLOWED");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    /// No module allow-pattern matches the URI.
    #[error("access denied: module `{uri}` does not match any allowed module pattern")]
    ModuleNotAllowed { uri: String },

    /// No resource allow-pattern matches the URI.
    #[error("access denied: resource `{uri}` does not match any allowed resource pattern")]
    ResourceNotAllowed { uri: String },

    /// The file URI resolves outside the configured root directory.
    #[error("access denied: `{uri}` is outside root directory `{root}`")]
    OutsideRootDir { uri: String, root: String },

    /// The importing module is less trusted than the imported one.
    #[error(
        "access denied: module `{importing}` cannot import `{imported}` because it has a lower trust level"
    )]
    InsufficientTrust { importing: String, imported: String },

    /// The target exists but its real path could not be determined.
    #[error("access denied: cannot resolve real path of `{uri}`: {reason}")]
    PathResolution { uri: String, reason: String },
}

impl AccessDenied {
    /// Returns the URI the denial is about (the imported one for imports).
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::ModuleNotAllowed { uri }
            | Self::ResourceNotAllowed { uri }
            | Self::OutsideRootDir { uri, .. }
            | Self::PathResolution { uri, .. } => uri,
            Self::InsufficientTrust { imported, .. } => imported,
        }
    }
}

impl ErrorCode for AccessDenied {
    fn code(&self) -> &'static str {
        match self {
            Self::ModuleNotAllowed { .. } => "ACCESS_MODULE_NOT_ALLOWED",
            Self::ResourceNotAllowed { .. } => "ACCESS_RESOURCE_NOT_ALLOWED",
            Self::OutsideRootDir { .. } => "ACCESS_OUTSIDE_ROOT_DIR",
            Self::InsufficientTrust { .. } => "ACCESS_INSUFFICIENT_TRUST",
            Self::PathResolution { .. } => "ACCESS_PATH_RESOLUTION",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// A [`StandardPolicy`](crate::StandardPolicy) could not be built.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Neither modules nor resources are allowed.
    #[error("no access policy configured: both allow-lists are empty")]
    Empty,

    /// An allow-pattern is not a valid regular expression.
    #[error("invalid URI pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The root directory could not be made absolute or canonical.
    #[error("cannot normalize root directory `{path}`: {source}")]
    RootDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ErrorCode for PolicyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "ACCESS_POLICY_EMPTY",
            Self::InvalidPattern { .. } => "ACCESS_INVALID_PATTERN",
            Self::RootDir { .. } => "ACCESS_ROOT_DIR",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::assert_error_codes;

    #[test]
    fn all_access_codes_valid() {
        assert_error_codes(
            &[
                AccessDenied::ModuleNotAllowed { uri: "a:".into() },
                AccessDenied::ResourceNotAllowed { uri: "a:".into() },
                AccessDenied::OutsideRootDir {
                    uri: "file:///etc/passwd".into(),
                    root: "/sandbox".into(),
                },
                AccessDenied::InsufficientTrust {
                    importing: "pkl:base".into(),
                    imported: "repl:text".into(),
                },
                AccessDenied::PathResolution {
                    uri: "file:///x".into(),
                    reason: "io".into(),
                },
            ],
            "ACCESS_",
        );
    }

    #[test]
    fn all_policy_codes_valid() {
        assert_error_codes(
            &[
                PolicyError::Empty,
                PolicyError::InvalidPattern {
                    pattern: "(".into(),
                    reason: "unclosed group".into(),
                },
                PolicyError::RootDir {
                    path: "x".into(),
                    source: std::io::Error::other("boom"),
                },
            ],
            "ACCESS_",
        );
    }

    #[test]
    fn import_denial_names_both_uris() {
        let err = AccessDenied::InsufficientTrust {
            importing: "pkl:base".into(),
            imported: "repl:text".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pkl:base"), "got: {msg}");
        assert!(msg.contains("repl:text"), "got: {msg}");
        assert_eq!(err.uri(), "repl:text");
    }

    #[test]
    fn denials_are_never_recoverable() {
        let err = AccessDenied::OutsideRootDir {
            uri: "file:///etc/passwd".into(),
            root: "/sandbox".into(),
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("file:///etc/passwd"));
    }
}
