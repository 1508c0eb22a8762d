//! Lazily rendered `output.files` entries.

use super::session::SessionCore;
use crate::error::EvalError;
use crate::source::ModuleSource;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// One `output.files` entry. Rendered on first access, inside the
/// session that produced it, then cached.
pub struct FileOutput {
    core: Arc<SessionCore>,
    source: ModuleSource,
    name: String,
    text: OnceLock<String>,
}

impl fmt::Debug for FileOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileOutput")
            .field("name", &self.name)
            .field("rendered", &self.text.get().is_some())
            .finish_non_exhaustive()
    }
}

impl FileOutput {
    pub(crate) fn new(core: Arc<SessionCore>, source: ModuleSource, name: String) -> Self {
        Self {
            core,
            source,
            name,
            text: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// Any [`EvalError`]; [`EvalError::SessionUnavailable`] once the
    /// evaluator is closed. Failures are not cached.
    pub fn get_text(&self) -> Result<&str, EvalError> {
        if let Some(text) = self.text.get() {
            return Ok(text);
        }
        let rendered = self
            .core
            .run(|vm| vm.load(&self.source)?.output_file_text(vm, &self.name))?;
        Ok(self.text.get_or_init(|| rendered))
    }

    /// # Errors
    ///
    /// As [`get_text`](Self::get_text).
    pub fn get_bytes(&self) -> Result<&[u8], EvalError> {
        self.get_text().map(str::as_bytes)
    }
}
