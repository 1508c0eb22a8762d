//! Module sources: a URI to resolve, or a URI tag plus authoritative text.

use std::path::Path;
use url::Url;

/// URI tag for inline text evaluated without any backend.
pub const REPL_TEXT_URI: &str = "repl:text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Resolve through the factory chain.
    Uri(String),
    /// `text` is served as the module body; `uri` is its identity.
    Text { uri: String, text: String },
}

impl ModuleSource {
    #[must_use]
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    #[must_use]
    pub fn url(url: &Url) -> Self {
        Self::Uri(url.to_string())
    }

    /// A local file. Relative paths are made absolute against the working directory.
    #[must_use]
    pub fn path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let url = std::path::absolute(path)
            .ok()
            .and_then(|abs| Url::from_file_path(abs).ok());
        match url {
            Some(url) => Self::Uri(url.to_string()),
            None => Self::Uri(path.display().to_string()),
        }
    }

    /// Inline text under [`REPL_TEXT_URI`].
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            uri: REPL_TEXT_URI.to_string(),
            text: text.into(),
        }
    }

    /// Text served in place of whatever `uri` would resolve to.
    #[must_use]
    pub fn with_text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            uri: uri.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn uri_str(&self) -> &str {
        match self {
            Self::Uri(uri) | Self::Text { uri, .. } => uri,
        }
    }

    #[must_use]
    pub fn text_contents(&self) -> Option<&str> {
        match self {
            Self::Uri(_) => None,
            Self::Text { text, .. } => Some(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_uses_repl_uri() {
        let src = ModuleSource::text("a = 1");
        assert_eq!(src.uri_str(), REPL_TEXT_URI);
        assert_eq!(src.text_contents(), Some("a = 1"));
    }

    #[cfg(unix)]
    #[test]
    fn path_becomes_file_uri() {
        let src = ModuleSource::path("/tmp/config.pkl");
        assert_eq!(src.uri_str(), "file:///tmp/config.pkl");
        assert!(src.text_contents().is_none());
    }
}
