//! Stack frames attached to user evaluation errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One frame of a user error: which member of which module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub module_uri: String,
    pub member: String,
}

impl StackFrame {
    #[must_use]
    pub fn new(module_uri: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            module_uri: module_uri.into(),
            member: member.into(),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} ({})", self.member, self.module_uri)
    }
}

/// Rewrites frames before they reach the caller.
pub type StackFrameTransformer = Arc<dyn Fn(StackFrame) -> StackFrame + Send + Sync>;

/// Leaves frames untouched.
#[must_use]
pub fn identity_transformer() -> StackFrameTransformer {
    Arc::new(|frame| frame)
}

/// Replaces a module URI prefix, e.g. to show project-relative locations.
#[must_use]
pub fn replace_uri_prefix(from: impl Into<String>, to: impl Into<String>) -> StackFrameTransformer {
    let from = from.into();
    let to = to.into();
    Arc::new(move |mut frame: StackFrame| {
        if let Some(rest) = frame.module_uri.strip_prefix(from.as_str()) {
            frame.module_uri = format!("{to}{rest}");
        }
        frame
    })
}
