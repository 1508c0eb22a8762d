//! The [`SecurityPolicy`] trait.
//!
//! Every module resolution, resource resolution, resource read and
//! import consults the policy before any I/O happens.

use crate::error::AccessDenied;
use crate::root_dir::SecurePath;
use std::fmt::Debug;
use url::Url;

/// Authorizes URI access. Implementations must be stateless or
/// internally synchronized; one policy is shared by every evaluation.
pub trait SecurityPolicy: Send + Sync + Debug {
    /// Authorizes resolving `uri` as a module.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] naming `uri`.
    fn check_resolve_module(&self, uri: &Url) -> Result<(), AccessDenied>;

    /// Authorizes resolving `uri` as a resource (e.g. glob expansion).
    ///
    /// Defaults to [`check_read_resource`](Self::check_read_resource).
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] naming `uri`.
    fn check_resolve_resource(&self, uri: &Url) -> Result<(), AccessDenied> {
        self.check_read_resource(uri)
    }

    /// Authorizes reading the resource at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] naming `uri`.
    fn check_read_resource(&self, uri: &Url) -> Result<(), AccessDenied>;

    /// Authorizes `importing` to import `imported`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied::InsufficientTrust`] naming both URIs.
    fn check_import_module(&self, importing: &Url, imported: &Url) -> Result<(), AccessDenied>;

    /// Resolves a `file:` URI to a path proven to be under the root directory.
    ///
    /// `Ok(None)` means no root is configured or `uri` is not a file URI.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] if the path escapes the root.
    fn resolve_secure_path(&self, uri: &Url) -> Result<Option<SecurePath>, AccessDenied> {
        let _ = uri;
        Ok(None)
    }
}

/// A policy that allows everything. For tests and trusted embedding only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissivePolicy;

impl SecurityPolicy for PermissivePolicy {
    fn check_resolve_module(&self, _uri: &Url) -> Result<(), AccessDenied> {
        Ok(())
    }

    fn check_read_resource(&self, _uri: &Url) -> Result<(), AccessDenied> {
        Ok(())
    }

    fn check_import_module(&self, _importing: &Url, _imported: &Url) -> Result<(), AccessDenied> {
        Ok(())
    }
}
