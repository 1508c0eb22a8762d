//! Exported value tree.
//!
//! [`Value`] is what evaluation hands back to the embedding application:
//! a fully forced, immutable tree with no remaining references into the
//! execution context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A fully evaluated value.
///
/// Objects keep their members in key order so that exported trees
/// compare and render deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Creates an empty object.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Returns the member `key` if this is an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(members) => members.get(key),
            _ => None,
        }
    }

    /// Follows a sequence of member names.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_types::Value;
    ///
    /// let v: Value = serde_json::from_str(r#"{"a":{"b":1}}"#).expect("valid json");
    /// assert_eq!(v.get_path(["a", "b"]), Some(&Value::Int(1)));
    /// assert_eq!(v.get_path(["a", "c"]), None);
    /// ```
    #[must_use]
    pub fn get_path<'a, I>(&self, path: I) -> Option<&Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        path.into_iter().try_fold(self, |current, key| current.get(key))
    }

    /// Returns the string content if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Language-level type name, as shown in schemas and error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::List(_) => "Listing",
            Self::Object(_) => "Dynamic",
        }
    }

    /// Renders as pretty-printed JSON.
    #[must_use]
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(members) => {
                f.write_str("{")?;
                for (i, (key, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(members: BTreeMap<String, Value>) -> Self {
        Self::Object(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        serde_json::from_str(r#"{"name":"app","port":8080,"tags":["a","b"],"tls":null}"#)
            .expect("should parse sample json")
    }

    #[test]
    fn untagged_deserialization_picks_variants() {
        let v = sample();
        assert_eq!(v.get("name"), Some(&Value::String("app".into())));
        assert_eq!(v.get("port"), Some(&Value::Int(8080)));
        assert!(v.get("tls").is_some_and(Value::is_null));
        assert_eq!(v.get("tags").map(Value::type_name), Some("Listing"));
    }

    #[test]
    fn display_is_single_line() {
        let v = sample();
        let shown = v.to_string();
        assert!(!shown.contains('\n'));
        assert!(shown.contains("\"port\": 8080"), "got: {shown}");
    }

    #[test]
    fn pretty_json_round_trips_structure() {
        let v = sample();
        let back: Value =
            serde_json::from_str(&v.to_json_pretty()).expect("should parse rendered json");
        assert_eq!(back, v);
    }

    #[test]
    fn get_on_non_object_is_none() {
        assert_eq!(Value::Int(1).get("x"), None);
        assert_eq!(Value::from("s").as_str(), Some("s"));
    }
}
