//! The ordered resolver chain.

use super::keys::{FixedTextKey, SyntheticKey};
use super::{ModuleKey, ModuleKeyFactory};
use crate::error::ResolveError;
use crate::source::{ModuleSource, REPL_TEXT_URI};
use std::sync::Arc;
use url::Url;

/// Parses an absolute URI; relative references are rejected outright.
///
/// # Errors
///
/// [`ResolveError::RelativeUri`] or [`ResolveError::InvalidUri`].
pub fn parse_absolute(uri: &str) -> Result<Url, ResolveError> {
    match Url::parse(uri) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Err(ResolveError::RelativeUri {
            uri: uri.to_string(),
        }),
        Err(e) => Err(ResolveError::invalid_uri(uri, e)),
    }
}

/// Tries each factory in registration order; the first to claim a URI wins.
///
/// Order is the only dispatch: put a specific backend before a generic one
/// to shadow it.
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver {
    factories: Vec<Arc<dyn ModuleKeyFactory>>,
}

impl ModuleResolver {
    #[must_use]
    pub fn new(factories: Vec<Arc<dyn ModuleKeyFactory>>) -> Self {
        Self { factories }
    }

    #[must_use]
    pub fn factories(&self) -> &[Arc<dyn ModuleKeyFactory>] {
        &self.factories
    }

    /// Resolves a source to a key.
    ///
    /// Inline text under [`REPL_TEXT_URI`] becomes a synthetic key with no
    /// backend involved; inline text under any other URI wraps that URI's
    /// key so the text is served instead of re-read.
    ///
    /// # Errors
    ///
    /// See [`resolve_uri`](Self::resolve_uri); relative URIs are rejected first.
    pub fn resolve(&self, source: &ModuleSource) -> Result<Arc<dyn ModuleKey>, ResolveError> {
        let uri = parse_absolute(source.uri_str())?;
        match source.text_contents() {
            Some(text) if uri.as_str() == REPL_TEXT_URI => {
                Ok(Arc::new(SyntheticKey::new(uri, text)))
            }
            Some(text) => {
                let inner = self.resolve_uri(&uri)?;
                Ok(Arc::new(FixedTextKey::new(inner, text)))
            }
            None => self.resolve_uri(&uri),
        }
    }

    /// Finds the first factory claiming `uri`.
    ///
    /// # Errors
    ///
    /// A factory error stops the chain. If every factory declines,
    /// returns [`ResolveError::NoResolverRegistered`].
    pub fn resolve_uri(&self, uri: &Url) -> Result<Arc<dyn ModuleKey>, ResolveError> {
        for factory in &self.factories {
            if let Some(key) = factory.create(uri)? {
                tracing::debug!(uri = %uri, factory = ?factory, "module key created");
                return Ok(key);
            }
        }
        Err(ResolveError::NoResolverRegistered {
            uri: uri.to_string(),
        })
    }

    /// Closes every factory, logging failures.
    pub fn close(&self) {
        for factory in &self.factories {
            if let Err(e) = factory.close() {
                tracing::warn!(factory = ?factory, error = %e, "failed to close module key factory");
            }
        }
    }
}
