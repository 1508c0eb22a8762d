use super::{Resource, ResourceReader};
use crate::error::ResolveError;
use crate::module::ResolveContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Dispatches resource reads by scheme and caches results for the session.
///
/// A reader registered later for the same scheme replaces the earlier one.
#[derive(Debug)]
pub struct ResourceManager {
    readers: HashMap<String, Arc<dyn ResourceReader>>,
    cache: Mutex<HashMap<Url, Resource>>,
}

impl ResourceManager {
    #[must_use]
    pub fn new(readers: &[Arc<dyn ResourceReader>]) -> Self {
        let readers = readers
            .iter()
            .map(|r| (r.scheme().to_string(), Arc::clone(r)))
            .collect();
        Self {
            readers,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn reader(&self, scheme: &str) -> Option<&Arc<dyn ResourceReader>> {
        self.readers.get(scheme)
    }

    /// Reads `uri`, checking the policy before the cache.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::Denied`] if the policy rejects the read
    /// - [`ResolveError::NoResourceReader`] for an unregistered scheme
    /// - [`ResolveError::NotFound`] if the reader has no such resource
    pub fn read(&self, uri: &Url, ctx: &ResolveContext) -> Result<Resource, ResolveError> {
        ctx.policy().check_read_resource(uri)?;
        if let Some(cached) = self.cache.lock().get(uri) {
            return Ok(cached.clone());
        }
        let reader = self
            .readers
            .get(uri.scheme())
            .ok_or_else(|| ResolveError::NoResourceReader {
                uri: uri.to_string(),
                scheme: uri.scheme().to_string(),
            })?;
        let resource = reader
            .read(uri, ctx)?
            .ok_or_else(|| ResolveError::not_found(uri))?;
        tracing::debug!(uri = %uri, len = resource.bytes.len(), "resource read");
        self.cache
            .lock()
            .entry(uri.clone())
            .or_insert_with(|| resource.clone());
        Ok(resource)
    }

    /// Closes every reader.
    pub fn close(&self) {
        for reader in self.readers.values() {
            reader.close();
        }
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::readers;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_auth::{PermissivePolicy, StandardPolicy};

    fn url(s: &str) -> Url {
        Url::parse(s).expect("should parse url")
    }

    #[derive(Debug, Default)]
    struct Counting {
        reads: AtomicUsize,
    }

    impl ResourceReader for Counting {
        fn scheme(&self) -> &str {
            "count"
        }

        fn read(&self, uri: &Url, _ctx: &ResolveContext) -> Result<Option<Resource>, ResolveError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Resource::new(uri.clone(), n.to_string().into_bytes())))
        }
    }

    #[test]
    fn reads_are_cached_per_uri() {
        let counting = Arc::new(Counting::default());
        let manager = ResourceManager::new(&[counting.clone() as Arc<dyn ResourceReader>]);
        let ctx = ResolveContext::new(Arc::new(PermissivePolicy));
        let first = manager.read(&url("count:a"), &ctx).expect("should read");
        let again = manager.read(&url("count:a"), &ctx).expect("should read");
        assert_eq!(first, again);
        manager.read(&url("count:b"), &ctx).expect("should read");
        assert_eq!(counting.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn policy_is_checked_before_cache() {
        let manager = ResourceManager::new(&[readers::environment_variables()]);
        let open = ResolveContext::new(Arc::new(PermissivePolicy))
            .with_env(BTreeMap::from([("HOME".into(), "/h".into())]));
        manager.read(&url("env:HOME"), &open).expect("should read");

        let closed = ResolveContext::new(Arc::new(
            StandardPolicy::builder()
                .with_allowed_resource_patterns(["prop:"])
                .expect("should compile")
                .build()
                .expect("should build"),
        ));
        let err = manager
            .read(&url("env:HOME"), &closed)
            .expect_err("should deny cached resource");
        assert!(matches!(err, ResolveError::Denied(_)));
    }

    #[test]
    fn unknown_scheme_and_missing_resource() {
        let manager = ResourceManager::new(&[readers::environment_variables()]);
        let ctx = ResolveContext::new(Arc::new(PermissivePolicy));
        assert!(matches!(
            manager.read(&url("nope:x"), &ctx),
            Err(ResolveError::NoResourceReader { ref scheme, .. }) if scheme == "nope"
        ));
        assert!(matches!(
            manager.read(&url("env:UNSET_FOR_TEST"), &ctx),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn later_reader_replaces_earlier() {
        let manager = ResourceManager::new(&[
            readers::environment_variables(),
            readers::external("env", Arc::new(crate::external::ExternalReaderProcess::new(
                crate::project::ExternalReaderCommand::new("/nonexistent/reader"),
                tessera_types::EvaluatorId::new(),
            ))),
        ]);
        let ctx = ResolveContext::new(Arc::new(PermissivePolicy));
        let err = manager
            .read(&url("env:HOME"), &ctx)
            .expect_err("external reader should fail to spawn");
        assert!(matches!(err, ResolveError::ExternalReader { .. }), "got: {err}");
    }
}
