//! Module-level logging (`trace()` output and warnings raised by modules).
//!
//! Engine internals log through `tracing` directly; this trait is what
//! evaluated modules write to.
//!
//! | Logger | Use |
//! |--------|-----|
//! | [`NoopLogger`] | unconfigured evaluators |
//! | [`TracingLogger`] | preconfigured evaluators, target `tessera::module` |
//! | [`CapturingLogger`] | test runs, collects lines into `TestResults::logs` |

use crate::stack::StackFrame;
use parking_lot::Mutex;
use std::fmt::Debug;

pub trait Logger: Send + Sync + Debug {
    fn trace(&self, message: &str, frame: &StackFrame);
    fn warn(&self, message: &str, frame: &StackFrame);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn trace(&self, _message: &str, _frame: &StackFrame) {}
    fn warn(&self, _message: &str, _frame: &StackFrame) {}
}

/// Forwards module log lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn trace(&self, message: &str, frame: &StackFrame) {
        tracing::info!(target: "tessera::module", module = %frame.module_uri, member = %frame.member, "{message}");
    }

    fn warn(&self, message: &str, frame: &StackFrame) {
        tracing::warn!(target: "tessera::module", module = %frame.module_uri, member = %frame.member, "{message}");
    }
}

/// Buffers formatted log lines in memory.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    lines: Mutex<Vec<String>>,
}

impl CapturingLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Drains the buffer into one newline-terminated string.
    pub fn take(&self) -> String {
        let lines = std::mem::take(&mut *self.lines.lock());
        lines.into_iter().map(|l| l + "\n").collect()
    }

    fn push(&self, level: &str, message: &str, frame: &StackFrame) {
        self.lines
            .lock()
            .push(format!("{level}: {message} ({})", frame.module_uri));
    }
}

impl Logger for CapturingLogger {
    fn trace(&self, message: &str, frame: &StackFrame) {
        self.push("TRACE", message, frame);
    }

    fn warn(&self, message: &str, frame: &StackFrame) {
        self.push("WARN", message, frame);
    }
}
