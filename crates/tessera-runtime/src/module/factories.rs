//! Built-in module key factories.
//!
//! | Factory | Claims |
//! |---------|--------|
//! | [`standard_library`] | `pkl:` |
//! | [`module_path`] | `modulepath:` |
//! | [`file`] | `file:` |
//! | [`http`] | `http:`, `https:` |
//! | [`package`] | `package:` |
//! | [`project_package`] | `projectpackage:` |
//! | [`external`] | a caller-chosen scheme |

use super::keys::{
    ExternalModuleKey, FileKey, HttpKey, ModulePathKey, PackageKey, ProjectPackageKey,
    StandardLibraryKey,
};
use super::module_path::ModulePathResolver;
use super::package::PackageAssetUri;
use super::{ModuleKey, ModuleKeyFactory};
use crate::error::ResolveError;
use crate::external::ExternalReader;
use std::sync::Arc;
use url::Url;

#[derive(Debug)]
struct StandardLibraryFactory;

impl ModuleKeyFactory for StandardLibraryFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if uri.scheme() != "pkl" {
            return Ok(None);
        }
        Ok(Some(Arc::new(StandardLibraryKey::new(uri.clone()))))
    }
}

#[derive(Debug)]
struct FileFactory;

impl ModuleKeyFactory for FileFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if uri.scheme() != "file" {
            return Ok(None);
        }
        Ok(Some(Arc::new(FileKey::new(uri.clone()))))
    }
}

#[derive(Debug)]
struct HttpFactory;

impl ModuleKeyFactory for HttpFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if !matches!(uri.scheme(), "http" | "https") {
            return Ok(None);
        }
        Ok(Some(Arc::new(HttpKey::new(uri.clone()))))
    }
}

#[derive(Debug)]
struct ModulePathFactory {
    resolver: Arc<ModulePathResolver>,
}

impl ModuleKeyFactory for ModulePathFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if uri.scheme() != "modulepath" {
            return Ok(None);
        }
        Ok(Some(Arc::new(ModulePathKey::new(
            uri.clone(),
            Arc::clone(&self.resolver),
        ))))
    }
}

#[derive(Debug)]
struct PackageFactory;

impl ModuleKeyFactory for PackageFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if uri.scheme() != "package" {
            return Ok(None);
        }
        let asset = PackageAssetUri::parse(uri)?;
        Ok(Some(Arc::new(PackageKey::new(uri.clone(), asset))))
    }
}

#[derive(Debug)]
struct ProjectPackageFactory;

impl ModuleKeyFactory for ProjectPackageFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if uri.scheme() != "projectpackage" {
            return Ok(None);
        }
        let asset = PackageAssetUri::parse(uri)?;
        Ok(Some(Arc::new(ProjectPackageKey::new(uri.clone(), asset))))
    }
}

#[derive(Debug)]
struct ExternalFactory {
    scheme: String,
    reader: ExternalReader,
}

impl ModuleKeyFactory for ExternalFactory {
    fn create(&self, uri: &Url) -> Result<Option<Arc<dyn ModuleKey>>, ResolveError> {
        if uri.scheme() != self.scheme {
            return Ok(None);
        }
        Ok(Some(Arc::new(ExternalModuleKey::new(
            uri.clone(),
            self.reader.clone(),
        ))))
    }

    fn close(&self) -> Result<(), ResolveError> {
        self.reader.close();
        Ok(())
    }
}

#[must_use]
pub fn standard_library() -> Arc<dyn ModuleKeyFactory> {
    Arc::new(StandardLibraryFactory)
}

#[must_use]
pub fn file() -> Arc<dyn ModuleKeyFactory> {
    Arc::new(FileFactory)
}

#[must_use]
pub fn http() -> Arc<dyn ModuleKeyFactory> {
    Arc::new(HttpFactory)
}

#[must_use]
pub fn module_path(resolver: Arc<ModulePathResolver>) -> Arc<dyn ModuleKeyFactory> {
    Arc::new(ModulePathFactory { resolver })
}

#[must_use]
pub fn package() -> Arc<dyn ModuleKeyFactory> {
    Arc::new(PackageFactory)
}

#[must_use]
pub fn project_package() -> Arc<dyn ModuleKeyFactory> {
    Arc::new(ProjectPackageFactory)
}

/// Module reads for `scheme` are delegated to an external reader.
#[must_use]
pub fn external(scheme: impl Into<String>, reader: impl Into<ExternalReader>) -> Arc<dyn ModuleKeyFactory> {
    Arc::new(ExternalFactory {
        scheme: scheme.into(),
        reader: reader.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("should parse url")
    }

    #[test]
    fn factories_decline_foreign_schemes() {
        let uri = url("bogus://x");
        for factory in [
            standard_library(),
            file(),
            http(),
            module_path(Arc::new(ModulePathResolver::default())),
            package(),
            project_package(),
        ] {
            assert!(
                factory.create(&uri).expect("should not error").is_none(),
                "{factory:?} should decline"
            );
        }
    }

    #[test]
    fn http_claims_both_schemes() {
        assert!(http().create(&url("http://x/a.pkl")).expect("ok").is_some());
        assert!(http().create(&url("https://x/a.pkl")).expect("ok").is_some());
    }

    #[test]
    fn malformed_package_uri_is_an_error_not_a_decline() {
        let err = package()
            .create(&url("package://pkg.example/birds"))
            .expect_err("should reject malformed package uri");
        assert!(matches!(err, ResolveError::InvalidUri { .. }));
    }
}
