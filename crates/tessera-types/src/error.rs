//! Unified error-code interface for Tessera.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so that
//! embedding tools can branch on a stable, machine-readable code instead
//! of parsing messages.
//!
//! # Code Prefixes
//!
//! | Crate / layer | Prefix |
//! |---------------|--------|
//! | access policy (`tessera-auth`) | `ACCESS_` |
//! | module / resource resolution | `RESOLVE_` |
//! | external reader wire protocol | `PROTOCOL_` |
//! | evaluator configuration | `CONFIG_` |
//! | evaluation session | `EVAL_` |
//!
//! # Example
//!
//! ```
//! use tessera_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     NotFound(String),
//!     Timeout,
//! }
//!
//! impl ErrorCode for FetchError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound(_) => "FETCH_NOT_FOUND",
//!             Self::Timeout => "FETCH_TIMEOUT",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Timeout)
//!     }
//! }
//!
//! assert_eq!(FetchError::Timeout.code(), "FETCH_TIMEOUT");
//! assert!(!FetchError::NotFound("pkl:nope".into()).is_recoverable());
//! ```

/// Machine-readable classification of an error.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, for example `"ACCESS_MODULE_NOT_ALLOWED"`
/// - **Prefixed** with the layer that raised it (see the module table)
/// - **Stable**: codes are an API contract and never change once released
///
/// # Recoverability
///
/// `is_recoverable()` answers "may the *same call* succeed if retried or
/// after the caller fixes its input?". Access denials and internal bugs are
/// never recoverable; transient I/O usually is.
pub trait ErrorCode {
    /// Returns the stable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying (or fixing caller input) may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code follows the workspace conventions.
///
/// # Panics
///
/// Panics if the code is empty, lacks `expected_prefix`, or is not
/// UPPER_SNAKE_CASE.
///
/// # Example
///
/// ```
/// use tessera_types::{assert_error_code, ErrorCode};
///
/// #[derive(Debug)]
/// struct Denied;
///
/// impl ErrorCode for Denied {
///     fn code(&self) -> &'static str { "ACCESS_DENIED" }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_code(&Denied, "ACCESS_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Asserts [`assert_error_code`] for every error in `errors`.
///
/// Intended for unit tests that enumerate all variants of an enum.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
