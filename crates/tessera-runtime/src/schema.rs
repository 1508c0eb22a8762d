//! Structural description of a module, produced without forcing
//! property bodies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSchema {
    pub module_uri: String,
    /// Last path segment of the URI without extension.
    pub module_name: String,
    pub properties: BTreeMap<String, PropertySchema>,
    pub classes: BTreeMap<String, ClassSchema>,
    pub type_aliases: BTreeMap<String, TypeAlias>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    pub name: String,
    /// Declared or inferred type, e.g. `String`, `Listing`, `Any`.
    pub type_name: String,
    pub doc: Option<String>,
}

impl PropertySchema {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            doc: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchema {
    pub name: String,
    pub superclass: Option<String>,
    pub doc: Option<String>,
    pub properties: BTreeMap<String, PropertySchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeAlias {
    pub name: String,
    pub aliased_type: String,
}

impl ModuleSchema {
    /// Module name derived from a URI: `file:///a/birds.pkl` → `birds`.
    #[must_use]
    pub fn name_from_uri(uri: &str) -> String {
        let last = uri
            .rsplit(&['/', ':'][..])
            .find(|s| !s.is_empty())
            .unwrap_or(uri);
        match last.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => last.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names_from_uris() {
        assert_eq!(ModuleSchema::name_from_uri("file:///a/birds.pkl"), "birds");
        assert_eq!(ModuleSchema::name_from_uri("pkl:base"), "base");
        assert_eq!(ModuleSchema::name_from_uri("repl:text"), "text");
    }

    #[test]
    fn serializes_camel_case() {
        let schema = ModuleSchema {
            module_uri: "repl:text".into(),
            module_name: "text".into(),
            ..ModuleSchema::default()
        };
        let json = serde_json::to_string(&schema).expect("should serialize");
        assert!(json.contains("\"typeAliases\""), "got: {json}");
        assert!(json.contains("\"moduleUri\""), "got: {json}");
    }
}
