//! The immutable configuration snapshot an [`Evaluator`](super::Evaluator) runs from.

use crate::http::HttpSettings;
use crate::interpreter::Interpreter;
use crate::logger::Logger;
use crate::module::ModuleKeyFactory;
use crate::project::DeclaredDependencies;
use crate::resource::ResourceReader;
use crate::stack::StackFrameTransformer;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tessera_auth::SecurityPolicy;
use tessera_types::EvaluatorId;

/// Produced by [`EvaluatorBuilder::build_config`](super::EvaluatorBuilder::build_config).
///
/// Owns its own copy of every collection; mutating the builder
/// afterwards has no effect on it.
#[derive(Clone)]
pub struct EvaluatorConfig {
    pub(crate) evaluator_id: EvaluatorId,
    pub(crate) module_key_factories: Vec<Arc<dyn ModuleKeyFactory>>,
    pub(crate) resource_readers: Vec<Arc<dyn ResourceReader>>,
    pub(crate) policy: Arc<dyn SecurityPolicy>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) module_cache_dir: Option<PathBuf>,
    pub(crate) dependencies: Option<Arc<DeclaredDependencies>>,
    pub(crate) output_format: Option<String>,
    pub(crate) color: bool,
    pub(crate) stack_frame_transformer: StackFrameTransformer,
    pub(crate) http: HttpSettings,
    pub(crate) interpreter: Arc<dyn Interpreter>,
}

impl fmt::Debug for EvaluatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorConfig")
            .field("evaluator_id", &self.evaluator_id)
            .field("module_key_factories", &self.module_key_factories.len())
            .field("resource_readers", &self.resource_readers.len())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("module_cache_dir", &self.module_cache_dir)
            .field("output_format", &self.output_format)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl EvaluatorConfig {
    #[must_use]
    pub fn evaluator_id(&self) -> EvaluatorId {
        self.evaluator_id
    }

    #[must_use]
    pub fn module_key_factories(&self) -> &[Arc<dyn ModuleKeyFactory>] {
        &self.module_key_factories
    }

    #[must_use]
    pub fn resource_readers(&self) -> &[Arc<dyn ResourceReader>] {
        &self.resource_readers
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<dyn SecurityPolicy> {
        &self.policy
    }

    #[must_use]
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn external_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `None` disables the package cache.
    #[must_use]
    pub fn module_cache_dir(&self) -> Option<&Path> {
        self.module_cache_dir.as_deref()
    }

    #[must_use]
    pub fn dependencies(&self) -> Option<&DeclaredDependencies> {
        self.dependencies.as_deref()
    }

    #[must_use]
    pub fn output_format(&self) -> Option<&str> {
        self.output_format.as_deref()
    }

    #[must_use]
    pub fn color(&self) -> bool {
        self.color
    }

    #[must_use]
    pub fn stack_frame_transformer(&self) -> &StackFrameTransformer {
        &self.stack_frame_transformer
    }

    #[must_use]
    pub fn http(&self) -> &HttpSettings {
        &self.http
    }

    #[must_use]
    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }
}
