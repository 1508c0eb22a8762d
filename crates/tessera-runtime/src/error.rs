//! Runtime errors.
//!
//! All errors implement [`ErrorCode`] for standardized handling.
//!
//! # Error Codes
//!
//! | Enum | Prefix | Raised by |
//! |------|--------|-----------|
//! | [`ResolveError`] | `RESOLVE_` | module/resource backends, resolver chain |
//! | [`ProtocolError`] | `PROTOCOL_` | external reader bridge |
//! | [`ConfigError`] | `CONFIG_` | evaluator builder, project loading |
//! | [`EvalError`] | `EVAL_` | every evaluator operation |
//!
//! The interpreter reports [`VmError`]; the session folds it into
//! [`EvalError`] after the timeout race has been decided.
//!
//! # Session impact
//!
//! | EvalError | Session after |
//! |-----------|---------------|
//! | `AccessDenied`, `Resolve`, `Evaluation` | still usable |
//! | `Bug`, `Timeout` | closed |
//! | `SessionUnavailable` | already closed |

use crate::stack::{StackFrame, StackFrameTransformer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tessera_auth::{AccessDenied, PolicyError};
use tessera_types::ErrorCode;
use thiserror::Error;

// ─── ResolveError ───────────────────────────────────────────────────

/// A module or resource URI could not be resolved.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The URI has no scheme.
    #[error("cannot resolve relative URI `{uri}`: module and resource URIs must be absolute")]
    RelativeUri { uri: String },

    /// The URI is syntactically invalid.
    #[error("invalid URI `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// No factory in the chain claimed the URI.
    #[error("no module resolver registered for URI `{uri}`")]
    NoResolverRegistered { uri: String },

    /// The backend claimed the URI but found nothing there.
    #[error("cannot find `{uri}`")]
    NotFound { uri: String },

    #[error("I/O error reading `{uri}`: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request for `{uri}` failed: {reason}")]
    Http { uri: String, reason: String },

    #[error("cannot resolve package `{uri}`: {reason}")]
    Package { uri: String, reason: String },

    /// The external reader process failed or violated the protocol.
    #[error("external reader failed for `{uri}`: {source}")]
    ExternalReader {
        uri: String,
        #[source]
        source: ProtocolError,
    },

    #[error("no resource reader registered for scheme `{scheme}` (URI `{uri}`)")]
    NoResourceReader { uri: String, scheme: String },

    #[error(transparent)]
    Denied(#[from] AccessDenied),
}

impl ResolveError {
    pub fn io(uri: impl ToString, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound {
                uri: uri.to_string(),
            };
        }
        Self::Io {
            uri: uri.to_string(),
            source,
        }
    }

    pub fn not_found(uri: impl ToString) -> Self {
        Self::NotFound {
            uri: uri.to_string(),
        }
    }

    pub fn invalid_uri(uri: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn package(uri: impl ToString, reason: impl ToString) -> Self {
        Self::Package {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn external(uri: impl ToString, source: ProtocolError) -> Self {
        Self::ExternalReader {
            uri: uri.to_string(),
            source,
        }
    }

    /// Whether a wait on an external reader was abandoned because the
    /// session was closing.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::ExternalReader {
                source: ProtocolError::Interrupted,
                ..
            }
        )
    }
}

impl ErrorCode for ResolveError {
    fn code(&self) -> &'static str {
        match self {
            Self::RelativeUri { .. } => "RESOLVE_RELATIVE_URI",
            Self::InvalidUri { .. } => "RESOLVE_INVALID_URI",
            Self::NoResolverRegistered { .. } => "RESOLVE_NO_RESOLVER_REGISTERED",
            Self::NotFound { .. } => "RESOLVE_NOT_FOUND",
            Self::Io { .. } => "RESOLVE_IO",
            Self::Http { .. } => "RESOLVE_HTTP",
            Self::Package { .. } => "RESOLVE_PACKAGE",
            Self::ExternalReader { .. } => "RESOLVE_EXTERNAL_READER",
            Self::NoResourceReader { .. } => "RESOLVE_NO_RESOURCE_READER",
            Self::Denied(_) => "RESOLVE_DENIED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Http { .. })
    }
}

// ─── ProtocolError ──────────────────────────────────────────────────

/// External reader wire failures.
///
/// `Clone` so a coalesced failure can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Framing(String),

    #[error("cannot encode message: {0}")]
    Encode(String),

    #[error("cannot decode message: {0}")]
    Decode(String),

    /// A response arrived whose type does not match the request.
    #[error("protocol violation: expected {expected} but received {received}")]
    UnexpectedResponse {
        expected: &'static str,
        received: &'static str,
    },

    #[error("external reader transport closed")]
    TransportClosed,

    /// The external reader process could not be started.
    #[error("cannot start external reader: {0}")]
    Spawn(String),

    /// The waiting evaluation was interrupted.
    #[error("request interrupted")]
    Interrupted,

    /// The external reader answered with an error.
    #[error("{0}")]
    Remote(String),
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::Framing(_) => "PROTOCOL_FRAMING",
            Self::Encode(_) => "PROTOCOL_ENCODE",
            Self::Decode(_) => "PROTOCOL_DECODE",
            Self::UnexpectedResponse { .. } => "PROTOCOL_UNEXPECTED_RESPONSE",
            Self::TransportClosed => "PROTOCOL_TRANSPORT_CLOSED",
            Self::Spawn(_) => "PROTOCOL_SPAWN",
            Self::Interrupted => "PROTOCOL_INTERRUPTED",
            Self::Remote(_) => "PROTOCOL_REMOTE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

// ─── ConfigError ────────────────────────────────────────────────────

/// The evaluator could not be configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A policy-shaping setter was called after a custom policy was set.
    #[error("cannot call `{setter}` after a custom security policy was set")]
    PolicyConflict { setter: &'static str },

    #[error("no stack frame transformer set")]
    MissingStackFrameTransformer,

    #[error("no security policy configured: allowed modules and allowed resources are both empty")]
    EmptyPolicy,

    #[error("invalid URI pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("cannot normalize root directory `{path}`: {source}")]
    RootDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse project `{origin}`: {source}")]
    ParseProject {
        origin: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("failed to read project file '{path}': {source}")]
    ReadProject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn external reader `{command}`: {source}")]
    ExternalReaderSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid HTTP settings: {0}")]
    Http(String),
}

impl ConfigError {
    pub fn parse_project(origin: impl Into<String>, source: toml::de::Error) -> Self {
        Self::ParseProject {
            origin: origin.into(),
            source: Box::new(source),
        }
    }

    pub fn read_project(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadProject {
            path: path.into(),
            source,
        }
    }
}

impl From<PolicyError> for ConfigError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Empty => Self::EmptyPolicy,
            PolicyError::InvalidPattern { pattern, reason } => {
                Self::InvalidPattern { pattern, reason }
            }
            PolicyError::RootDir { path, source } => Self::RootDir { path, source },
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::PolicyConflict { .. } => "CONFIG_POLICY_CONFLICT",
            Self::MissingStackFrameTransformer => "CONFIG_MISSING_STACK_FRAME_TRANSFORMER",
            Self::EmptyPolicy => "CONFIG_EMPTY_POLICY",
            Self::InvalidPattern { .. } => "CONFIG_INVALID_PATTERN",
            Self::RootDir { .. } => "CONFIG_ROOT_DIR",
            Self::ParseProject { .. } => "CONFIG_PARSE_PROJECT",
            Self::ReadProject { .. } => "CONFIG_READ_PROJECT",
            Self::ExternalReaderSpawn { .. } => "CONFIG_EXTERNAL_READER_SPAWN",
            Self::Http(_) => "CONFIG_HTTP",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

// ─── User errors ────────────────────────────────────────────────────

/// The module's own logic failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    pub message: String,
    pub frames: Vec<StackFrame>,
}

impl UserError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Appends a frame; innermost frames are pushed first.
    #[must_use]
    pub fn at(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    #[must_use]
    pub fn transform(self, transformer: &StackFrameTransformer) -> Self {
        Self {
            message: self.message,
            frames: self.frames.into_iter().map(|f| transformer(f)).collect(),
        }
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for frame in &self.frames {
            write!(f, "\n  {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for UserError {}

// ─── VmError ────────────────────────────────────────────────────────

/// Interpreter-side failure, before the session classifies it.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Eval(UserError),

    /// The interpreter hit a state it cannot attribute to user code.
    #[error("internal error: {0}")]
    Bug(String),

    /// The execution context was force-closed.
    #[error("evaluation cancelled")]
    Cancelled,

    #[error(transparent)]
    Denied(#[from] AccessDenied),

    #[error(transparent)]
    Resolve(ResolveError),
}

impl VmError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::Eval(UserError::new(message))
    }
}

/// An external read cut short by a forced close is a cancellation, not a
/// resolution failure.
impl From<ResolveError> for VmError {
    fn from(err: ResolveError) -> Self {
        if err.is_interrupted() {
            return Self::Cancelled;
        }
        Self::Resolve(err)
    }
}

impl From<UserError> for VmError {
    fn from(err: UserError) -> Self {
        Self::Eval(err)
    }
}

// ─── EvalError ──────────────────────────────────────────────────────

/// Outcome of a failed evaluator operation.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tessera_runtime::EvalError;
/// use tessera_types::ErrorCode;
///
/// let err = EvalError::Timeout { duration: Duration::from_millis(50) };
/// assert_eq!(err.code(), "EVAL_TIMEOUT");
/// assert!(err.closes_session());
/// ```
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    AccessDenied(AccessDenied),

    #[error(transparent)]
    Resolve(ResolveError),

    #[error("evaluation failed: {0}")]
    Evaluation(UserError),

    #[error("unexpected internal error (this is a bug in the evaluator): {message}")]
    Bug { message: String },

    #[error("evaluation timed out after {}ms", duration.as_millis())]
    Timeout { duration: Duration },

    #[error("evaluator session is closed")]
    SessionUnavailable,
}

impl EvalError {
    /// Whether this outcome forced the session closed.
    #[must_use]
    pub fn closes_session(&self) -> bool {
        matches!(self, Self::Bug { .. } | Self::Timeout { .. })
    }

    pub(crate) fn from_vm(err: VmError, transformer: &StackFrameTransformer) -> Self {
        match err {
            VmError::Eval(e) => Self::Evaluation(e.transform(transformer)),
            VmError::Bug(message) => Self::Bug { message },
            VmError::Cancelled => Self::SessionUnavailable,
            VmError::Resolve(e) if e.is_interrupted() => Self::SessionUnavailable,
            VmError::Denied(e) | VmError::Resolve(ResolveError::Denied(e)) => {
                Self::AccessDenied(e)
            }
            VmError::Resolve(e) => Self::Resolve(e),
        }
    }
}

impl From<ResolveError> for EvalError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Denied(e) => Self::AccessDenied(e),
            other if other.is_interrupted() => Self::SessionUnavailable,
            other => Self::Resolve(other),
        }
    }
}

impl ErrorCode for EvalError {
    fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "EVAL_ACCESS_DENIED",
            Self::Resolve(_) => "EVAL_RESOLVE",
            Self::Evaluation(_) => "EVAL_EVALUATION",
            Self::Bug { .. } => "EVAL_BUG",
            Self::Timeout { .. } => "EVAL_TIMEOUT",
            Self::SessionUnavailable => "EVAL_SESSION_UNAVAILABLE",
        }
    }

    /// A timed-out evaluation may succeed in a fresh session.
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::identity_transformer;
    use std::sync::Arc;
    use tessera_types::assert_error_codes;

    #[test]
    fn all_resolve_codes_valid() {
        assert_error_codes(
            &[
                ResolveError::RelativeUri { uri: "a.pkl".into() },
                ResolveError::invalid_uri("::", "empty scheme"),
                ResolveError::NoResolverRegistered {
                    uri: "bogus://x".into(),
                },
                ResolveError::not_found("file:///x.pkl"),
                ResolveError::Io {
                    uri: "file:///x.pkl".into(),
                    source: std::io::Error::other("boom"),
                },
                ResolveError::Http {
                    uri: "https://x".into(),
                    reason: "404".into(),
                },
                ResolveError::package("package://x/y@1#/a", "missing"),
                ResolveError::external("ext:/a", ProtocolError::TransportClosed),
                ResolveError::NoResourceReader {
                    uri: "x:y".into(),
                    scheme: "x".into(),
                },
                ResolveError::Denied(AccessDenied::ModuleNotAllowed { uri: "x:".into() }),
            ],
            "RESOLVE_",
        );
    }

    #[test]
    fn all_protocol_codes_valid() {
        assert_error_codes(
            &[
                ProtocolError::Framing("short".into()),
                ProtocolError::Encode("e".into()),
                ProtocolError::Decode("d".into()),
                ProtocolError::UnexpectedResponse {
                    expected: "ReadModuleResponse",
                    received: "ListModulesResponse",
                },
                ProtocolError::TransportClosed,
                ProtocolError::Spawn("no such file".into()),
                ProtocolError::Interrupted,
                ProtocolError::Remote("nope".into()),
            ],
            "PROTOCOL_",
        );
    }

    #[test]
    fn all_config_codes_valid() {
        let toml_err = "=".parse::<toml::Table>().expect_err("should fail to parse");
        assert_error_codes(
            &[
                ConfigError::PolicyConflict {
                    setter: "set_root_dir",
                },
                ConfigError::MissingStackFrameTransformer,
                ConfigError::EmptyPolicy,
                ConfigError::InvalidPattern {
                    pattern: "(".into(),
                    reason: "r".into(),
                },
                ConfigError::RootDir {
                    path: "/x".into(),
                    source: std::io::Error::other("boom"),
                },
                ConfigError::parse_project("<inline>", toml_err),
                ConfigError::read_project("/x/Project.toml", std::io::Error::other("boom")),
                ConfigError::ExternalReaderSpawn {
                    command: "reader".into(),
                    source: std::io::Error::other("boom"),
                },
                ConfigError::Http("bad proxy".into()),
            ],
            "CONFIG_",
        );
    }

    #[test]
    fn all_eval_codes_valid() {
        assert_error_codes(
            &[
                EvalError::AccessDenied(AccessDenied::ModuleNotAllowed { uri: "x:".into() }),
                EvalError::Resolve(ResolveError::not_found("file:///x")),
                EvalError::Evaluation(UserError::new("constraint violated")),
                EvalError::Bug {
                    message: "boom".into(),
                },
                EvalError::Timeout {
                    duration: Duration::from_secs(1),
                },
                EvalError::SessionUnavailable,
            ],
            "EVAL_",
        );
    }

    #[test]
    fn only_bug_and_timeout_close_session() {
        assert!(EvalError::Bug { message: "x".into() }.closes_session());
        assert!(EvalError::Timeout {
            duration: Duration::ZERO
        }
        .closes_session());
        assert!(!EvalError::Evaluation(UserError::new("x")).closes_session());
        assert!(!EvalError::SessionUnavailable.closes_session());
    }

    #[test]
    fn nested_denial_surfaces_as_access_denied() {
        let denied = AccessDenied::ModuleNotAllowed {
            uri: "file:///etc/passwd".into(),
        };
        let err = EvalError::from_vm(
            VmError::Resolve(ResolveError::Denied(denied.clone())),
            &identity_transformer(),
        );
        assert!(matches!(err, EvalError::AccessDenied(ref d) if *d == denied));
        let err: EvalError = ResolveError::Denied(denied).into();
        assert_eq!(err.code(), "EVAL_ACCESS_DENIED");
    }

    #[test]
    fn user_error_frames_are_transformed() {
        let transformer: StackFrameTransformer = Arc::new(|mut f: StackFrame| {
            f.member = f.member.to_uppercase();
            f
        });
        let err = EvalError::from_vm(
            VmError::Eval(UserError::new("bad").at(StackFrame::new("file:///a.pkl", "port"))),
            &transformer,
        );
        let EvalError::Evaluation(user) = err else {
            panic!("expected user error");
        };
        assert_eq!(user.frames[0].member, "PORT");
        assert!(user.to_string().contains("file:///a.pkl"));
    }

    #[test]
    fn interrupted_external_read_is_cancellation() {
        let err = ResolveError::external("ext:/slow.pkl", ProtocolError::Interrupted);
        assert!(err.is_interrupted());
        assert!(matches!(VmError::from(err), VmError::Cancelled));

        let raw = VmError::Resolve(ResolveError::external("ext:/slow.pkl", ProtocolError::Interrupted));
        assert!(matches!(
            EvalError::from_vm(raw, &identity_transformer()),
            EvalError::SessionUnavailable
        ));

        let closed = ResolveError::external("ext:/a.pkl", ProtocolError::TransportClosed);
        assert!(!closed.is_interrupted());
        assert!(matches!(VmError::from(closed), VmError::Resolve(_)));
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = ResolveError::io(
            "file:///missing.pkl",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn timeout_message_includes_duration() {
        let err = EvalError::Timeout {
            duration: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("50ms"), "got: {err}");
    }
}
