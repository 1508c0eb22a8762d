//! URI allow-patterns.
//!
//! A pattern matches when it matches a *prefix* of the URI string, so
//! `file:` admits every file URI and `https://example\.com/` admits a
//! single host. Literal prefixes skip the regex engine entirely.

use crate::error::PolicyError;
use regex::Regex;
use std::fmt;

#[derive(Clone)]
enum Matcher {
    Prefix(String),
    Regex(Regex),
}

/// A prefix-anchored URI pattern.
#[derive(Clone)]
pub struct UriPattern {
    source: String,
    matcher: Matcher,
}

impl UriPattern {
    /// Compiles a regular expression that must match at the start of the URI.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPattern`] if the expression does not compile.
    pub fn new(pattern: &str) -> Result<Self, PolicyError> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
            PolicyError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            matcher: Matcher::Regex(regex),
        })
    }

    /// A pattern admitting every URI that starts with `prefix` verbatim.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            source: regex::escape(&prefix),
            matcher: Matcher::Prefix(prefix),
        }
    }

    /// Returns `true` if the pattern matches a prefix of `uri`.
    #[must_use]
    pub fn matches(&self, uri: &str) -> bool {
        match &self.matcher {
            Matcher::Prefix(p) => uri.starts_with(p.as_str()),
            Matcher::Regex(r) => r.is_match(uri),
        }
    }

    /// The pattern as written (literal prefixes are shown escaped).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UriPattern").field(&self.source).finish()
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for UriPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Compiles each expression in order.
///
/// # Errors
///
/// Fails on the first expression that does not compile.
pub fn compile_all<I, S>(patterns: I) -> Result<Vec<UriPattern>, PolicyError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| UriPattern::new(p.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_is_prefix_anchored() {
        let p = UriPattern::new("https://example\\.com/").expect("should compile");
        assert!(p.matches("https://example.com/config.pkl"));
        assert!(!p.matches("http://evil/?https://example.com/"));
    }

    #[test]
    fn regex_need_not_match_whole_uri() {
        let p = UriPattern::new("file:").expect("should compile");
        assert!(p.matches("file:///etc/passwd"));
    }

    #[test]
    fn alternation_is_grouped_under_anchor() {
        let p = UriPattern::new("env:|prop:").expect("should compile");
        assert!(p.matches("prop:user"));
        assert!(p.matches("env:HOME"));
        assert!(!p.matches("xenv:HOME"));
    }

    #[test]
    fn literal_prefix_treats_metacharacters_literally() {
        let p = UriPattern::prefix("jar:file:");
        assert!(p.matches("jar:file:/lib.jar!/a.pkl"));
        let dot = UriPattern::prefix("a.b:");
        assert!(!dot.matches("aXb:thing"));
        assert_eq!(dot.as_str(), "a\\.b:");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = UriPattern::new("(unclosed").expect_err("should reject");
        let msg = err.to_string();
        assert!(msg.contains("(unclosed"), "got: {msg}");
    }

    #[test]
    fn compile_all_stops_on_first_error() {
        assert!(compile_all(["file:", "["]).is_err());
        let ok = compile_all(["file:", "https:"]).expect("should compile");
        assert_eq!(ok.len(), 2);
    }
}
