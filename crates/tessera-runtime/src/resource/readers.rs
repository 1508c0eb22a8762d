//! Built-in resource readers.
//!
//! | Reader | Scheme | Source |
//! |--------|--------|--------|
//! | [`environment_variables`] | `env:` | evaluator environment map |
//! | [`external_properties`] | `prop:` | evaluator property map |
//! | [`file`] | `file:` | local files, root-contained when a root is set |
//! | [`http`] / [`https`] | `http:` / `https:` | shared HTTP client |
//! | [`module_path`] | `modulepath:` | module search path |
//! | [`package`] | `package:` | module cache |
//! | [`project_package`] | `projectpackage:` | declared dependencies |
//! | [`external`] | any | external reader process |

use super::{Resource, ResourceReader};
use crate::error::ResolveError;
use crate::external::ExternalReader;
use crate::module::{read_project_package, ModulePathResolver, PackageAssetUri, ResolveContext};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

fn not_found_as_none(result: Result<Vec<u8>, ResolveError>) -> Result<Option<Vec<u8>>, ResolveError> {
    match result {
        Ok(bytes) => Ok(Some(bytes)),
        Err(ResolveError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Looks up `scheme:NAME` in a string map.
#[derive(Debug)]
struct MapReader {
    scheme: &'static str,
    select: fn(&ResolveContext) -> &BTreeMap<String, String>,
}

impl ResourceReader for MapReader {
    fn scheme(&self) -> &str {
        self.scheme
    }

    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let name = percent_decode_str(uri.path())
            .decode_utf8()
            .map_err(|e| ResolveError::invalid_uri(uri, e))?;
        Ok((self.select)(ctx)
            .get(name.as_ref())
            .map(|value| Resource::new(uri.clone(), value.as_bytes())))
    }
}

#[derive(Debug)]
struct FileReader;

impl ResourceReader for FileReader {
    fn scheme(&self) -> &str {
        "file"
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn has_hierarchical_uris(&self) -> bool {
        true
    }

    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let path = match ctx.policy().resolve_secure_path(uri)? {
            Some(secure) => secure.into_path_buf(),
            None => uri
                .to_file_path()
                .map_err(|()| ResolveError::invalid_uri(uri, "not a local file path"))?,
        };
        let bytes = not_found_as_none(std::fs::read(&path).map_err(|e| ResolveError::io(uri, e)))?;
        Ok(bytes.map(|b| Resource::new(uri.clone(), b)))
    }
}

#[derive(Debug)]
struct HttpReader {
    scheme: &'static str,
}

impl ResourceReader for HttpReader {
    fn scheme(&self) -> &str {
        self.scheme
    }

    fn has_hierarchical_uris(&self) -> bool {
        true
    }

    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let response = match ctx.http().get(uri) {
            Ok(response) => response,
            Err(ResolveError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if response.uri != *uri {
            ctx.policy().check_read_resource(&response.uri)?;
        }
        Ok(Some(Resource::new(uri.clone(), response.body)))
    }
}

#[derive(Debug)]
struct ModulePathReader {
    resolver: Arc<ModulePathResolver>,
}

impl ResourceReader for ModulePathReader {
    fn scheme(&self) -> &str {
        "modulepath"
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn has_hierarchical_uris(&self) -> bool {
        true
    }

    fn read(&self, uri: &Url, _ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let Some(path) = self.resolver.locate(uri.path()) else {
            return Ok(None);
        };
        let bytes = not_found_as_none(std::fs::read(&path).map_err(|e| ResolveError::io(uri, e)))?;
        Ok(bytes.map(|b| Resource::new(uri.clone(), b)))
    }
}

#[derive(Debug)]
struct PackageReader;

impl ResourceReader for PackageReader {
    fn scheme(&self) -> &str {
        "package"
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn has_hierarchical_uris(&self) -> bool {
        true
    }

    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let asset = PackageAssetUri::parse(uri)?;
        let bytes = ctx.packages().read_bytes(&asset)?;
        Ok(Some(Resource::new(uri.clone(), bytes)))
    }
}

#[derive(Debug)]
struct ProjectPackageReader;

impl ResourceReader for ProjectPackageReader {
    fn scheme(&self) -> &str {
        "projectpackage"
    }

    fn is_globbable(&self) -> bool {
        true
    }

    fn has_hierarchical_uris(&self) -> bool {
        true
    }

    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let asset = PackageAssetUri::parse(uri)?;
        let bytes = not_found_as_none(read_project_package(ctx, uri, &asset))?;
        Ok(bytes.map(|b| Resource::new(uri.clone(), b)))
    }
}

#[derive(Debug)]
struct ExternalResourceReader {
    scheme: String,
    reader: ExternalReader,
}

impl ResourceReader for ExternalResourceReader {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
        let bytes = self
            .reader
            .bridge()
            .and_then(|bridge| bridge.read_resource(uri, ctx.interrupt()))
            .map_err(|e| ResolveError::external(uri, e))?;
        Ok(Some(Resource::new(uri.clone(), bytes)))
    }

    fn close(&self) {
        self.reader.close();
    }
}

#[must_use]
pub fn environment_variables() -> Arc<dyn ResourceReader> {
    Arc::new(MapReader {
        scheme: "env",
        select: ResolveContext::env,
    })
}

#[must_use]
pub fn external_properties() -> Arc<dyn ResourceReader> {
    Arc::new(MapReader {
        scheme: "prop",
        select: ResolveContext::properties,
    })
}

#[must_use]
pub fn file() -> Arc<dyn ResourceReader> {
    Arc::new(FileReader)
}

#[must_use]
pub fn http() -> Arc<dyn ResourceReader> {
    Arc::new(HttpReader { scheme: "http" })
}

#[must_use]
pub fn https() -> Arc<dyn ResourceReader> {
    Arc::new(HttpReader { scheme: "https" })
}

#[must_use]
pub fn module_path(resolver: Arc<ModulePathResolver>) -> Arc<dyn ResourceReader> {
    Arc::new(ModulePathReader { resolver })
}

#[must_use]
pub fn package() -> Arc<dyn ResourceReader> {
    Arc::new(PackageReader)
}

#[must_use]
pub fn project_package() -> Arc<dyn ResourceReader> {
    Arc::new(ProjectPackageReader)
}

/// A reader for `scheme` served by an external reader process.
#[must_use]
pub fn external(scheme: impl Into<String>, reader: impl Into<ExternalReader>) -> Arc<dyn ResourceReader> {
    Arc::new(ExternalResourceReader {
        scheme: scheme.into(),
        reader: reader.into(),
    })
}
