//! Resource readers and the per-session resource manager.
//!
//! ```text
//! read("env:HOME") ──► ResourceManager ── check_read_resource ──► cache? ──► reader["env"]
//! ```
//!
//! A reader returns `Ok(None)` when the resource does not exist; the
//! manager turns that into [`ResolveError::NotFound`].

mod manager;
pub mod readers;

pub use manager::ResourceManager;

use crate::error::ResolveError;
use crate::module::ResolveContext;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Raw resource contents under the URI they were read from.
#[derive(Clone, PartialEq, Eq)]
pub struct Resource {
    pub uri: Url,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri.as_str())
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Resource {
    #[must_use]
    pub fn new(uri: Url, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            uri,
            bytes: bytes.into(),
        }
    }

    /// Contents as UTF-8 text, if valid.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// Reads resources for one URI scheme.
pub trait ResourceReader: Send + Sync + fmt::Debug {
    fn scheme(&self) -> &str;

    /// Whether glob patterns may be expanded against this scheme.
    fn is_globbable(&self) -> bool {
        false
    }

    /// Whether URIs of this scheme have path hierarchy (`a/b/c`).
    fn has_hierarchical_uris(&self) -> bool {
        false
    }

    /// # Errors
    ///
    /// Returns a backend error tagged with `uri`. A missing resource is `Ok(None)`.
    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError>;

    /// Releases backend resources. Called best-effort on session close.
    fn close(&self) {}
}
