//! Package URIs and the on-disk module cache.
//!
//! ```text
//! package://pkg.example/birds@1.2.0#/lib/Bird.pkl
//!           └── host ──┘└name┘└ver┘ └── asset ──┘
//!
//! <cache_dir>/package-1/pkg.example/birds@1.2.0/lib/Bird.pkl
//! ```
//!
//! The cache holds already-extracted packages. A configured directory
//! that does not exist simply yields "not in cache" for every asset.

use crate::error::ResolveError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_auth::normalize_lexically;
use tessera_types::PathElement;
use url::Url;

/// Cache layout version directory.
pub const PACKAGE_CACHE_LAYOUT: &str = "package-1";

/// A parsed `package:` or `projectpackage:` asset URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageAssetUri {
    /// `package://host/name@version` (always the `package` scheme).
    pub package: String,
    pub host: String,
    /// Name path without the version, e.g. `/birds`.
    pub name: String,
    pub version: String,
    /// Asset path inside the package, always starting with `/`.
    pub asset: String,
}

impl PackageAssetUri {
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidUri`] if host, version or asset path is missing.
    pub fn parse(uri: &Url) -> Result<Self, ResolveError> {
        if !matches!(uri.scheme(), "package" | "projectpackage") {
            return Err(ResolveError::invalid_uri(uri, "not a package URI"));
        }
        let host = uri
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ResolveError::invalid_uri(uri, "package URI has no host"))?;
        let (name, version) = uri
            .path()
            .rsplit_once('@')
            .filter(|(n, v)| !n.is_empty() && !v.is_empty())
            .ok_or_else(|| ResolveError::invalid_uri(uri, "package URI has no version"))?;
        let asset = uri
            .fragment()
            .filter(|f| f.starts_with('/'))
            .ok_or_else(|| {
                ResolveError::invalid_uri(uri, "package URI fragment must be an absolute asset path")
            })?;
        Ok(Self {
            package: format!("package://{host}{name}@{version}"),
            host: host.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            asset: asset.to_string(),
        })
    }

    /// # Errors
    ///
    /// See [`parse`](Self::parse); also fails on unparseable text.
    pub fn parse_str(uri: &str) -> Result<Self, ResolveError> {
        let url = Url::parse(uri).map_err(|e| ResolveError::invalid_uri(uri, e))?;
        Self::parse(&url)
    }

    #[must_use]
    pub fn display_uri(&self) -> String {
        format!("{}#{}", self.package, self.asset)
    }
}

/// Reads package assets from the module cache directory.
#[derive(Debug, Default)]
pub struct PackageResolver {
    cache_dir: Option<PathBuf>,
    closed: AtomicBool,
}

impl PackageResolver {
    #[must_use]
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> Option<&std::path::Path> {
        self.cache_dir.as_deref()
    }

    fn package_dir(&self, asset: &PackageAssetUri) -> Result<PathBuf, ResolveError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ResolveError::package(
                asset.display_uri(),
                "package resolver is closed",
            ));
        }
        let cache = self.cache_dir.as_ref().ok_or_else(|| {
            ResolveError::package(asset.display_uri(), "no module cache directory is configured")
        })?;
        Ok(cache
            .join(PACKAGE_CACHE_LAYOUT)
            .join(&asset.host)
            .join(format!(
                "{}@{}",
                asset.name.trim_start_matches('/'),
                asset.version
            )))
    }

    fn asset_path(&self, asset: &PackageAssetUri) -> Result<PathBuf, ResolveError> {
        let dir = normalize_lexically(&self.package_dir(asset)?);
        let path = normalize_lexically(&dir.join(asset.asset.trim_start_matches('/')));
        if !path.starts_with(&dir) {
            return Err(ResolveError::package(
                asset.display_uri(),
                "asset path escapes the package",
            ));
        }
        Ok(path)
    }

    /// # Errors
    ///
    /// Returns a package error when the asset is not cached.
    pub fn read_bytes(&self, asset: &PackageAssetUri) -> Result<Vec<u8>, ResolveError> {
        let path = self.asset_path(asset)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ResolveError::package(
                asset.display_uri(),
                "package asset is not in the module cache",
            ),
            _ => ResolveError::io(asset.display_uri(), e),
        })
    }

    /// # Errors
    ///
    /// As [`read_bytes`](Self::read_bytes), plus invalid UTF-8.
    pub fn read_text(&self, asset: &PackageAssetUri) -> Result<String, ResolveError> {
        String::from_utf8(self.read_bytes(asset)?)
            .map_err(|_| ResolveError::package(asset.display_uri(), "asset is not valid UTF-8"))
    }

    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    pub fn list(&self, asset: &PackageAssetUri) -> Result<Vec<PathElement>, ResolveError> {
        let path = self.asset_path(asset)?;
        let mut out = Vec::new();
        for entry in
            std::fs::read_dir(&path).map_err(|e| ResolveError::io(asset.display_uri(), e))?
        {
            let entry = entry.map_err(|e| ResolveError::io(asset.display_uri(), e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            out.push(PathElement {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: is_dir,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Refuses further reads. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(cache_dir = ?self.cache_dir, "package resolver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(s: &str) -> PackageAssetUri {
        PackageAssetUri::parse_str(s).expect("should parse package uri")
    }

    #[test]
    fn parses_package_uri() {
        let a = asset("package://pkg.example/birds@1.2.0#/lib/Bird.pkl");
        assert_eq!(a.host, "pkg.example");
        assert_eq!(a.name, "/birds");
        assert_eq!(a.version, "1.2.0");
        assert_eq!(a.asset, "/lib/Bird.pkl");
        assert_eq!(a.package, "package://pkg.example/birds@1.2.0");
    }

    #[test]
    fn project_package_normalizes_to_package_scheme() {
        let a = asset("projectpackage://pkg.example/birds@1.2.0#/Bird.pkl");
        assert!(a.package.starts_with("package://"));
    }

    #[test]
    fn rejects_incomplete_uris() {
        for bad in [
            "package://pkg.example/birds#/Bird.pkl",
            "package://pkg.example/birds@1.0.0",
            "package://pkg.example/birds@1.0.0#Bird.pkl",
            "https://pkg.example/birds@1.0.0#/Bird.pkl",
        ] {
            assert!(PackageAssetUri::parse_str(bad).is_err(), "should reject {bad}");
        }
    }

    #[test]
    fn reads_from_cache_layout() {
        let cache = tempfile::tempdir().expect("should create cache");
        let dir = cache
            .path()
            .join(PACKAGE_CACHE_LAYOUT)
            .join("pkg.example/birds@1.2.0/lib");
        std::fs::create_dir_all(&dir).expect("should mkdir");
        std::fs::write(dir.join("Bird.pkl"), "name = \"Bird\"").expect("should write");
        let resolver = PackageResolver::new(Some(cache.path().to_path_buf()));
        let text = resolver
            .read_text(&asset("package://pkg.example/birds@1.2.0#/lib/Bird.pkl"))
            .expect("should read cached asset");
        assert!(text.contains("Bird"));
        let listed = resolver
            .list(&asset("package://pkg.example/birds@1.2.0#/lib"))
            .expect("should list");
        assert_eq!(listed, vec![PathElement::file("Bird.pkl")]);
    }

    #[test]
    fn missing_cache_dir_is_not_fatal() {
        let resolver = PackageResolver::new(Some(PathBuf::from("/tessera/no/such/cache")));
        let err = resolver
            .read_text(&asset("package://pkg.example/birds@1.2.0#/Bird.pkl"))
            .expect_err("should miss");
        assert!(err.to_string().contains("not in the module cache"), "got: {err}");
    }

    #[test]
    fn asset_escape_is_rejected() {
        let cache = tempfile::tempdir().expect("should create cache");
        let resolver = PackageResolver::new(Some(cache.path().to_path_buf()));
        let err = resolver
            .read_bytes(&asset("package://pkg.example/birds@1.2.0#/../../../etc/passwd"))
            .expect_err("should reject");
        assert!(err.to_string().contains("escapes"), "got: {err}");
    }

    #[test]
    fn closed_resolver_refuses_reads() {
        let cache = tempfile::tempdir().expect("should create cache");
        let resolver = PackageResolver::new(Some(cache.path().to_path_buf()));
        resolver.close();
        resolver.close();
        let err = resolver
            .read_bytes(&asset("package://pkg.example/birds@1.2.0#/Bird.pkl"))
            .expect_err("should refuse");
        assert!(err.to_string().contains("closed"), "got: {err}");
    }
}
