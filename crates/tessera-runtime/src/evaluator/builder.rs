//! Mutable accumulator for [`EvaluatorConfig`].
//!
//! # Presets
//!
//! | | `unconfigured()` | `preconfigured()` |
//! |---|---|---|
//! | module factories | none | stdlib, file, http(s), package, projectpackage |
//! | resource readers | none | env, prop, file, http, https, package, projectpackage |
//! | allow-lists | empty | defaults |
//! | environment | empty | host process |
//! | logger | [`NoopLogger`] | [`TracingLogger`] |
//! | frame transformer | none (build fails) | identity |
//!
//! # Security policy
//!
//! Either the allow-list, trust-level and root-directory setters shape
//! a [`StandardPolicy`](tessera_auth::StandardPolicy), or
//! [`set_security_policy`](EvaluatorBuilder::set_security_policy)
//! supplies one outright. Calling a shaping setter after a custom
//! policy was set fails immediately with [`ConfigError::PolicyConflict`].

use super::config::EvaluatorConfig;
use super::session::Evaluator;
use crate::error::ConfigError;
use crate::external::ExternalReaderProcess;
use crate::http::HttpSettings;
use crate::interpreter::{DataInterpreter, Interpreter};
use crate::logger::{Logger, NoopLogger, TracingLogger};
use crate::module::{factories, ModuleKeyFactory, ModulePathResolver};
use crate::project::{DeclaredDependencies, ExternalReaderCommand, Project};
use crate::resource::{readers, ResourceReader};
use crate::stack::{identity_transformer, StackFrameTransformer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tessera_auth::{
    compile_all, default_allowed_modules, default_allowed_resources, SecurityPolicy,
    StandardPolicyBuilder, TrustLevels, UriPattern,
};
use tessera_types::EvaluatorId;

/// Default package cache location under the home directory.
#[must_use]
pub fn default_module_cache_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tessera").join("cache"))
}

/// See the [module docs](self).
///
/// # Example
///
/// ```
/// use tessera_runtime::{EvaluatorBuilder, ModuleSource};
///
/// let evaluator = EvaluatorBuilder::preconfigured()
///     .add_env_var("GREETING", "hello")
///     .build()
///     .expect("valid configuration");
/// let value = evaluator
///     .evaluate_expression(&ModuleSource::text("name = \"x\""), "name")
///     .expect("evaluates");
/// assert_eq!(value.as_str(), Some("x"));
/// ```
#[derive(Clone)]
pub struct EvaluatorBuilder {
    evaluator_id: EvaluatorId,
    module_key_factories: Vec<Arc<dyn ModuleKeyFactory>>,
    resource_readers: Vec<Arc<dyn ResourceReader>>,
    policy: StandardPolicyBuilder,
    custom_policy: Option<Arc<dyn SecurityPolicy>>,
    logger: Arc<dyn Logger>,
    env: BTreeMap<String, String>,
    properties: BTreeMap<String, String>,
    timeout: Option<Duration>,
    module_cache_dir: Option<PathBuf>,
    dependencies: Option<DeclaredDependencies>,
    output_format: Option<String>,
    color: bool,
    stack_frame_transformer: Option<StackFrameTransformer>,
    http: HttpSettings,
    interpreter: Arc<dyn Interpreter>,
}

impl std::fmt::Debug for EvaluatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorBuilder")
            .field("evaluator_id", &self.evaluator_id)
            .field("module_key_factories", &self.module_key_factories)
            .field("resource_readers", &self.resource_readers)
            .field("allowed_modules", &self.policy.allowed_modules())
            .field("allowed_resources", &self.policy.allowed_resources())
            .field("custom_policy", &self.custom_policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for EvaluatorBuilder {
    fn default() -> Self {
        Self::unconfigured()
    }
}

impl EvaluatorBuilder {
    /// Empty lists, no-op logger, default cache directory, no frame transformer.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            evaluator_id: EvaluatorId::new(),
            module_key_factories: Vec::new(),
            resource_readers: Vec::new(),
            policy: StandardPolicyBuilder::new(),
            custom_policy: None,
            logger: Arc::new(NoopLogger),
            env: BTreeMap::new(),
            properties: BTreeMap::new(),
            timeout: None,
            module_cache_dir: default_module_cache_dir(),
            dependencies: None,
            output_format: None,
            color: false,
            stack_frame_transformer: None,
            http: HttpSettings::default(),
            interpreter: Arc::new(DataInterpreter),
        }
    }

    /// The default backend chain, readers, allow-lists and host environment.
    #[must_use]
    pub fn preconfigured() -> Self {
        let mut builder = Self::unconfigured()
            .add_module_key_factories([
                factories::standard_library(),
                factories::file(),
                factories::http(),
                factories::package(),
                factories::project_package(),
            ])
            .add_resource_readers([
                readers::environment_variables(),
                readers::external_properties(),
                readers::file(),
                readers::http(),
                readers::https(),
                readers::package(),
                readers::project_package(),
            ])
            .add_env_vars(std::env::vars())
            .set_logger(Arc::new(TracingLogger))
            .set_stack_frame_transformer(identity_transformer());
        builder.policy = StandardPolicyBuilder::new()
            .with_allowed_modules(default_allowed_modules())
            .with_allowed_resources(default_allowed_resources());
        builder
    }

    #[must_use]
    pub fn evaluator_id(&self) -> EvaluatorId {
        self.evaluator_id
    }

    fn ensure_no_custom_policy(&self, setter: &'static str) -> Result<(), ConfigError> {
        if self.custom_policy.is_some() {
            return Err(ConfigError::PolicyConflict { setter });
        }
        Ok(())
    }

    // ─── Backends ───────────────────────────────────────────────────

    #[must_use]
    pub fn add_module_key_factory(mut self, factory: Arc<dyn ModuleKeyFactory>) -> Self {
        self.module_key_factories.push(factory);
        self
    }

    #[must_use]
    pub fn add_module_key_factories(
        mut self,
        factories: impl IntoIterator<Item = Arc<dyn ModuleKeyFactory>>,
    ) -> Self {
        self.module_key_factories.extend(factories);
        self
    }

    #[must_use]
    pub fn set_module_key_factories(
        mut self,
        factories: impl IntoIterator<Item = Arc<dyn ModuleKeyFactory>>,
    ) -> Self {
        self.module_key_factories.clear();
        self.add_module_key_factories(factories)
    }

    #[must_use]
    pub fn module_key_factories(&self) -> &[Arc<dyn ModuleKeyFactory>] {
        &self.module_key_factories
    }

    #[must_use]
    pub fn add_resource_reader(mut self, reader: Arc<dyn ResourceReader>) -> Self {
        self.resource_readers.push(reader);
        self
    }

    #[must_use]
    pub fn add_resource_readers(
        mut self,
        readers: impl IntoIterator<Item = Arc<dyn ResourceReader>>,
    ) -> Self {
        self.resource_readers.extend(readers);
        self
    }

    #[must_use]
    pub fn set_resource_readers(
        mut self,
        readers: impl IntoIterator<Item = Arc<dyn ResourceReader>>,
    ) -> Self {
        self.resource_readers.clear();
        self.add_resource_readers(readers)
    }

    #[must_use]
    pub fn resource_readers(&self) -> &[Arc<dyn ResourceReader>] {
        &self.resource_readers
    }

    /// Registers a `modulepath:` factory and reader over `roots`.
    #[must_use]
    pub fn add_module_path(self, roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        let resolver = Arc::new(ModulePathResolver::new(roots));
        self.add_module_key_factory(factories::module_path(Arc::clone(&resolver)))
            .add_resource_reader(readers::module_path(resolver))
    }

    /// Registers an external reader process serving modules of `scheme`.
    #[must_use]
    pub fn add_external_module_reader(
        self,
        scheme: impl Into<String>,
        command: ExternalReaderCommand,
    ) -> Self {
        let process = Arc::new(ExternalReaderProcess::new(command, self.evaluator_id));
        self.add_module_key_factory(factories::external(scheme, process))
    }

    /// Registers an external reader process serving resources of `scheme`.
    #[must_use]
    pub fn add_external_resource_reader(
        self,
        scheme: impl Into<String>,
        command: ExternalReaderCommand,
    ) -> Self {
        let process = Arc::new(ExternalReaderProcess::new(command, self.evaluator_id));
        self.add_resource_reader(readers::external(scheme, process))
    }

    // ─── Policy ─────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] after [`set_security_policy`](Self::set_security_policy).
    pub fn add_allowed_modules(
        mut self,
        patterns: impl IntoIterator<Item = UriPattern>,
    ) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("add_allowed_modules")?;
        self.policy = self.policy.with_allowed_modules(patterns);
        Ok(self)
    }

    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] after [`set_security_policy`](Self::set_security_policy).
    pub fn set_allowed_modules(
        mut self,
        patterns: impl IntoIterator<Item = UriPattern>,
    ) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("set_allowed_modules")?;
        self.policy.set_allowed_modules(patterns.into_iter().collect());
        Ok(self)
    }

    /// Compiles and appends module allow-patterns.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPattern`] or [`ConfigError::PolicyConflict`].
    pub fn add_allowed_module_patterns<I, S>(self, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_no_custom_policy("add_allowed_module_patterns")?;
        let compiled = compile_all(patterns)?;
        self.add_allowed_modules(compiled)
    }

    #[must_use]
    pub fn allowed_modules(&self) -> &[UriPattern] {
        self.policy.allowed_modules()
    }

    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] after [`set_security_policy`](Self::set_security_policy).
    pub fn add_allowed_resources(
        mut self,
        patterns: impl IntoIterator<Item = UriPattern>,
    ) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("add_allowed_resources")?;
        self.policy = self.policy.with_allowed_resources(patterns);
        Ok(self)
    }

    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] after [`set_security_policy`](Self::set_security_policy).
    pub fn set_allowed_resources(
        mut self,
        patterns: impl IntoIterator<Item = UriPattern>,
    ) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("set_allowed_resources")?;
        self.policy
            .set_allowed_resources(patterns.into_iter().collect());
        Ok(self)
    }

    /// Compiles and appends resource allow-patterns.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPattern`] or [`ConfigError::PolicyConflict`].
    pub fn add_allowed_resource_patterns<I, S>(self, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_no_custom_policy("add_allowed_resource_patterns")?;
        let compiled = compile_all(patterns)?;
        self.add_allowed_resources(compiled)
    }

    #[must_use]
    pub fn allowed_resources(&self) -> &[UriPattern] {
        self.policy.allowed_resources()
    }

    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] after [`set_security_policy`](Self::set_security_policy).
    pub fn set_trust_levels(mut self, trust_levels: TrustLevels) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("set_trust_levels")?;
        self.policy = self.policy.with_trust_levels(trust_levels);
        Ok(self)
    }

    /// Confines `file:` access to `root_dir`; `None` lifts the restriction.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] after [`set_security_policy`](Self::set_security_policy).
    pub fn set_root_dir(mut self, root_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("set_root_dir")?;
        self.policy.set_root_dir(root_dir);
        Ok(self)
    }

    /// Replaces the policy built from allow-lists with `policy`.
    #[must_use]
    pub fn set_security_policy(mut self, policy: Arc<dyn SecurityPolicy>) -> Self {
        self.custom_policy = Some(policy);
        self
    }

    // ─── Environment ────────────────────────────────────────────────

    #[must_use]
    pub fn set_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn add_env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn add_env_vars(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn set_env_vars(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env.clear();
        self.add_env_vars(vars)
    }

    #[must_use]
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn add_external_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn add_external_properties(
        mut self,
        properties: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn set_external_properties(
        mut self,
        properties: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.properties.clear();
        self.add_external_properties(properties)
    }

    #[must_use]
    pub fn external_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    // ─── Limits and output ──────────────────────────────────────────

    #[must_use]
    pub fn set_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `None` disables the package cache.
    #[must_use]
    pub fn set_module_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.module_cache_dir = dir;
        self
    }

    #[must_use]
    pub fn module_cache_dir(&self) -> Option<&std::path::Path> {
        self.module_cache_dir.as_deref()
    }

    #[must_use]
    pub fn set_project_dependencies(mut self, dependencies: DeclaredDependencies) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    #[must_use]
    pub fn set_output_format(mut self, format: Option<String>) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn set_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn set_stack_frame_transformer(mut self, transformer: StackFrameTransformer) -> Self {
        self.stack_frame_transformer = Some(transformer);
        self
    }

    #[must_use]
    pub fn set_http_settings(mut self, http: HttpSettings) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn http_settings(&self) -> &HttpSettings {
        &self.http
    }

    #[must_use]
    pub fn set_interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    // ─── Project ────────────────────────────────────────────────────

    /// Folds the settings a project declares into this builder.
    ///
    /// Settings the project leaves out keep the builder's value.
    /// `noCache = true` wins over `moduleCacheDir`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PolicyConflict`] if a custom policy was set, whatever
    /// the project declares; [`ConfigError::InvalidPattern`] for a
    /// bad allow-pattern; [`ConfigError::Http`] for a bad proxy address.
    pub fn apply_from_project(mut self, project: &Project) -> Result<Self, ConfigError> {
        self.ensure_no_custom_policy("apply_from_project")?;
        let settings = &project.evaluator_settings;
        if let Some(patterns) = &settings.allowed_modules {
            let compiled = compile_all(patterns)?;
            self = self.set_allowed_modules(compiled)?;
        }
        if let Some(patterns) = &settings.allowed_resources {
            let compiled = compile_all(patterns)?;
            self = self.set_allowed_resources(compiled)?;
        }
        if let Some(root) = &settings.root_dir {
            self = self.set_root_dir(Some(root.clone()))?;
        }
        if let Some(properties) = &settings.external_properties {
            self = self.set_external_properties(properties.clone());
        }
        if let Some(env) = &settings.env {
            self = self.set_env_vars(env.clone());
        }
        if let Some(timeout) = settings.timeout() {
            self = self.set_timeout(Some(timeout));
        }
        if let Some(roots) = &settings.module_path {
            self = self.add_module_path(roots.iter().cloned());
        }
        if settings.no_cache == Some(true) {
            self = self.set_module_cache_dir(None);
        } else if let Some(dir) = &settings.module_cache_dir {
            self = self.set_module_cache_dir(Some(dir.clone()));
        }
        if let Some(color) = settings.color {
            self = self.set_color(color);
        }
        if let Some(readers) = &settings.external_module_readers {
            for (scheme, command) in readers {
                self = self.add_external_module_reader(scheme.clone(), command.clone());
            }
        }
        if let Some(readers) = &settings.external_resource_readers {
            for (scheme, command) in readers {
                self = self.add_external_resource_reader(scheme.clone(), command.clone());
            }
        }
        if let Some(http) = &settings.http {
            let mut merged = self.http.clone();
            if let Some(proxy) = &http.proxy {
                if let Some(address) = &proxy.address {
                    merged.proxy = Some(address.clone());
                }
                if let Some(no_proxy) = &proxy.no_proxy {
                    merged.no_proxy = no_proxy.clone();
                }
            }
            if let Some(rewrites) = &http.rewrites {
                merged.rewrites = rewrites
                    .iter()
                    .map(|(from, to)| (from.clone(), to.clone()))
                    .collect();
            }
            crate::http::HttpClient::new(&merged)?;
            self = self.set_http_settings(merged);
        }
        if !project.dependencies.is_empty() {
            self = self.set_project_dependencies(project.declared_dependencies());
        }
        tracing::debug!(project_dir = ?project.project_dir, "applied project settings");
        Ok(self)
    }

    // ─── Build ──────────────────────────────────────────────────────

    /// Snapshots the builder.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingStackFrameTransformer`] if none was set
    /// - [`ConfigError::EmptyPolicy`] if no custom policy was set and both allow-lists are empty
    /// - [`ConfigError::RootDir`] if the root directory cannot be normalized
    pub fn build_config(&self) -> Result<EvaluatorConfig, ConfigError> {
        let stack_frame_transformer = self
            .stack_frame_transformer
            .clone()
            .ok_or(ConfigError::MissingStackFrameTransformer)?;
        let policy: Arc<dyn SecurityPolicy> = match &self.custom_policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(self.policy.clone().build()?),
        };
        Ok(EvaluatorConfig {
            evaluator_id: self.evaluator_id,
            module_key_factories: self.module_key_factories.clone(),
            resource_readers: self.resource_readers.clone(),
            policy,
            logger: Arc::clone(&self.logger),
            env: self.env.clone(),
            properties: self.properties.clone(),
            timeout: self.timeout,
            module_cache_dir: self.module_cache_dir.clone(),
            dependencies: self.dependencies.clone().map(Arc::new),
            output_format: self.output_format.clone(),
            color: self.color,
            stack_frame_transformer,
            http: self.http.clone(),
            interpreter: Arc::clone(&self.interpreter),
        })
    }

    /// Builds the configuration and opens a session on it.
    ///
    /// # Errors
    ///
    /// See [`build_config`](Self::build_config); also [`ConfigError::Http`].
    pub fn build(&self) -> Result<Evaluator, ConfigError> {
        Evaluator::new(self.build_config()?)
    }
}
