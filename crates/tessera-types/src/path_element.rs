//! Directory listing entries.

use serde::{Deserialize, Serialize};

/// One entry of a hierarchical listing (module path, package, external
/// reader). Serialized with the wire field names of the external reader
/// protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathElement {
    pub name: String,
    pub is_directory: bool,
}

impl PathElement {
    #[must_use]
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
        }
    }

    #[must_use]
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
        }
    }
}
