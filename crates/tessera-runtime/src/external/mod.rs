//! Out-of-process module and resource readers.
//!
//! # Architecture
//!
//! ```text
//! ExternalModuleKey / ExternalResourceReader
//!          │
//!          ▼
//!   ExternalReader ──► ExternalReaderProcess (lazy spawn)
//!          │                     │
//!          └──────────┬──────────┘
//!                     ▼
//!          ExternalReaderBridge ── frames ──► reader process stdin
//!                     ▲
//!     reader thread ──┘◄── frames ── reader process stdout
//! ```
//!
//! Wire format: 4-byte big-endian length, then a MessagePack array
//! `[code, body]` where `body` is a map with camelCase keys.

mod bridge;
mod process;
pub mod protocol;

pub use bridge::ExternalReaderBridge;
pub use process::ExternalReaderProcess;

use crate::error::ProtocolError;
use std::sync::Arc;

/// Either an already-connected bridge or a process started on first use.
#[derive(Debug, Clone)]
pub enum ExternalReader {
    Bridge(Arc<ExternalReaderBridge>),
    Process(Arc<ExternalReaderProcess>),
}

impl ExternalReader {
    /// # Errors
    ///
    /// Returns [`ProtocolError::Spawn`] if a lazy process fails to start,
    /// or [`ProtocolError::TransportClosed`] after close.
    pub fn bridge(&self) -> Result<Arc<ExternalReaderBridge>, ProtocolError> {
        match self {
            Self::Bridge(bridge) => Ok(Arc::clone(bridge)),
            Self::Process(process) => process.bridge(),
        }
    }

    pub fn close(&self) {
        match self {
            Self::Bridge(bridge) => bridge.close(),
            Self::Process(process) => process.close(),
        }
    }
}

impl From<Arc<ExternalReaderBridge>> for ExternalReader {
    fn from(bridge: Arc<ExternalReaderBridge>) -> Self {
        Self::Bridge(bridge)
    }
}

impl From<Arc<ExternalReaderProcess>> for ExternalReader {
    fn from(process: Arc<ExternalReaderProcess>) -> Self {
        Self::Process(process)
    }
}
