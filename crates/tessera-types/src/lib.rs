//! Core types for Tessera.
//!
//! Sits at the bottom of the workspace dependency graph:
//!
//! ```text
//! tessera-types   (ErrorCode, ids, Value, PathElement)  ◄── HERE
//!      ↑
//! tessera-auth    (SecurityPolicy, AccessDenied, StandardPolicy)
//!      ↑
//! tessera-runtime (resolver, resources, evaluator session, external readers)
//! ```
//!
//! Nothing here performs I/O.

mod error;
mod id;
mod path_element;
mod value;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{EvaluatorId, RequestId};
pub use path_element::PathElement;
pub use value::Value;
