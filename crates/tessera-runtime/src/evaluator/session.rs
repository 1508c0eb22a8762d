//! Evaluation sessions.
//!
//! # Lifecycle
//!
//! ```text
//! Open ──close()/timeout/bug──► Closing ──► Closed
//! ```
//!
//! Every operation funnels through [`SessionCore::run`]:
//!
//! 1. arm a [`TimeoutTask`] if a timeout is configured
//! 2. enter the execution context
//! 3. run the thunk, catching panics
//! 4. leave the context, then `cancel()` the task
//! 5. classify: bug beats timeout, timeout beats everything else
//!
//! # Outcome table
//!
//! | thunk | timer started | reported | session |
//! |-------|---------------|----------|---------|
//! | panic or `VmError::Bug` | any | `Bug` | closed |
//! | anything else | yes | `Timeout` | closed |
//! | `Ok` | no | value | open |
//! | `VmError::Cancelled` | no | `SessionUnavailable` | closed by another caller |
//! | other `VmError` | no | mapped error | open |

use super::config::EvaluatorConfig;
use super::context::{ExecutionContext, VmContext};
use super::output::FileOutput;
use super::timeout::{TimeoutScheduler, TimeoutTask};
use crate::error::{ConfigError, EvalError, VmError};
use crate::http::HttpClient;
use crate::module::{ModuleResolver, PackageResolver, ResolveContext};
use crate::resource::ResourceManager;
use crate::schema::ModuleSchema;
use crate::source::ModuleSource;
use crate::test_results::TestResults;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tessera_types::{EvaluatorId, Value};

const OUTPUT_TEXT: &str = "output.text";
const OUTPUT_VALUE: &str = "output.value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
pub(crate) struct SessionCore {
    config: EvaluatorConfig,
    context: ExecutionContext,
    state: Mutex<SessionState>,
    scheduler: TimeoutScheduler,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "evaluation panicked".to_string()
    }
}

impl SessionCore {
    fn new(config: EvaluatorConfig) -> Result<Self, ConfigError> {
        let http = Arc::new(HttpClient::new(&config.http)?);
        let packages = Arc::new(PackageResolver::new(config.module_cache_dir.clone()));
        let resolve = ResolveContext::new(Arc::clone(&config.policy))
            .with_http(http)
            .with_packages(packages)
            .with_dependencies(config.dependencies.clone())
            .with_env(config.env.clone())
            .with_properties(config.properties.clone());
        let vm = VmContext::new(
            ModuleResolver::new(config.module_key_factories.clone()),
            ResourceManager::new(&config.resource_readers),
            resolve,
            Arc::clone(&config.interpreter),
            Arc::clone(&config.logger),
        )
        .with_output(config.output_format.clone(), config.color);
        Ok(Self {
            context: ExecutionContext::new(vm),
            state: Mutex::new(SessionState::Open),
            scheduler: TimeoutScheduler::default(),
            config,
        })
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn arm_timeout(self: &Arc<Self>) -> Result<Option<Arc<TimeoutTask>>, EvalError> {
        let Some(timeout) = self.config.timeout else {
            return Ok(None);
        };
        let task = Arc::new(TimeoutTask::new());
        let session = Arc::downgrade(self);
        self.scheduler
            .schedule(timeout, Arc::clone(&task), move || {
                if let Some(session) = session.upgrade() {
                    session.close();
                }
            })
            .map_err(|e| EvalError::Bug {
                message: format!("cannot start timeout thread: {e}"),
            })?;
        Ok(Some(task))
    }

    /// Runs `thunk` inside the execution context under the timeout race.
    pub(crate) fn run<T>(
        self: &Arc<Self>,
        thunk: impl FnOnce(&VmContext) -> Result<T, VmError>,
    ) -> Result<T, EvalError> {
        if self.state() != SessionState::Open {
            return Err(EvalError::SessionUnavailable);
        }
        let task = self.arm_timeout()?;
        let outcome = match self.context.enter() {
            Ok(entered) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| thunk(entered.vm())));
                drop(entered);
                Some(outcome)
            }
            Err(EvalError::SessionUnavailable) => None,
            Err(e) => {
                if let Some(task) = &task {
                    task.cancel();
                }
                return Err(e);
            }
        };
        let won = task.as_ref().map_or(true, |task| task.cancel());

        let result = match outcome {
            Some(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(%message, "evaluation panicked; closing session");
                self.close();
                return Err(EvalError::Bug { message });
            }
            Some(Ok(result)) => result,
            None if won => return Err(EvalError::SessionUnavailable),
            None => Err(VmError::Cancelled),
        };
        if let Err(VmError::Bug(message)) = result {
            tracing::error!(%message, "internal evaluator error; closing session");
            self.close();
            return Err(EvalError::Bug { message });
        }
        if !won {
            let duration = self.config.timeout.unwrap_or_default();
            tracing::warn!(timeout = ?duration, "evaluation timed out");
            self.close();
            return Err(EvalError::Timeout { duration });
        }
        result.map_err(|e| EvalError::from_vm(e, &self.config.stack_frame_transformer))
    }

    /// Idempotent. Blocks until any running evaluation has unwound.
    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Open {
                return;
            }
            *state = SessionState::Closing;
        }
        self.context.force_close();
        self.context.vm().close();
        self.scheduler.shutdown();
        *self.state.lock() = SessionState::Closed;
        tracing::info!(evaluator_id = %self.config.evaluator_id, "evaluator closed");
    }
}

/// One evaluation session.
///
/// Evaluations run one at a time; a call from a second thread waits
/// for the first to finish. Dropping the evaluator closes it.
///
/// # Example
///
/// ```
/// use tessera_runtime::{EvaluatorBuilder, ModuleSource};
///
/// let evaluator = EvaluatorBuilder::preconfigured().build().expect("valid configuration");
/// let text = evaluator
///     .evaluate_output_text(&ModuleSource::text("port = 8080"))
///     .expect("evaluates");
/// assert!(text.contains("\"port\": 8080"));
/// evaluator.close();
/// assert!(evaluator.is_closed());
/// ```
#[derive(Debug)]
pub struct Evaluator {
    core: Arc<SessionCore>,
}

impl Evaluator {
    /// Opens a session on `config`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Http`] if the HTTP settings are invalid.
    pub fn new(config: EvaluatorConfig) -> Result<Self, ConfigError> {
        let core = SessionCore::new(config)?;
        tracing::info!(
            evaluator_id = %core.config.evaluator_id,
            timeout = ?core.config.timeout,
            "evaluator created"
        );
        Ok(Self {
            core: Arc::new(core),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EvaluatorConfig {
        &self.core.config
    }

    #[must_use]
    pub fn evaluator_id(&self) -> EvaluatorId {
        self.core.config.evaluator_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.state() != SessionState::Open || self.core.context.is_closed()
    }

    /// Forces full evaluation and exports the module's value tree.
    ///
    /// # Errors
    ///
    /// Any [`EvalError`]; `Bug` and `Timeout` also close the session.
    pub fn evaluate_module(&self, source: &ModuleSource) -> Result<Value, EvalError> {
        self.core.run(|vm| {
            let module = vm.load(source)?;
            module.force(vm)?;
            module.export(vm)
        })
    }

    /// `output.text` of the module.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module).
    pub fn evaluate_output_text(&self, source: &ModuleSource) -> Result<String, EvalError> {
        self.core.run(|vm| vm.load(source)?.output_text(vm))
    }

    /// `output.value` of the module.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module).
    pub fn evaluate_output_value(&self, source: &ModuleSource) -> Result<Value, EvalError> {
        self.core.run(|vm| vm.load(source)?.output_value(vm))
    }

    /// `output.value` deserialized into `T`.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module); a shape mismatch is
    /// an [`EvalError::Evaluation`].
    pub fn evaluate_output_value_as<T: DeserializeOwned>(
        &self,
        source: &ModuleSource,
    ) -> Result<T, EvalError> {
        let value = self.evaluate_output_value(source)?;
        serde_json::to_value(&value)
            .and_then(serde_json::from_value)
            .map_err(|e| {
                EvalError::Evaluation(crate::error::UserError::new(format!(
                    "cannot convert output.value: {e}"
                )))
            })
    }

    /// `output.files`, with each entry rendered only on demand.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module).
    pub fn evaluate_output_files(
        &self,
        source: &ModuleSource,
    ) -> Result<BTreeMap<String, FileOutput>, EvalError> {
        let names = self
            .core
            .run(|vm| vm.load(source)?.output_file_names(vm))?;
        Ok(names
            .into_iter()
            .map(|name| {
                let output = FileOutput::new(Arc::clone(&self.core), source.clone(), name.clone());
                (name, output)
            })
            .collect())
    }

    /// Evaluates `expression` against the module.
    ///
    /// `output.text` and `output.value` take the direct output path.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module).
    pub fn evaluate_expression(
        &self,
        source: &ModuleSource,
        expression: &str,
    ) -> Result<Value, EvalError> {
        match expression {
            OUTPUT_TEXT => self.evaluate_output_text(source).map(Value::String),
            OUTPUT_VALUE => self.evaluate_output_value(source),
            _ => self
                .core
                .run(|vm| vm.load(source)?.evaluate_expression(vm, expression)),
        }
    }

    /// Like [`evaluate_expression`](Self::evaluate_expression), rendered as a string.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module).
    pub fn evaluate_expression_string(
        &self,
        source: &ModuleSource,
        expression: &str,
    ) -> Result<String, EvalError> {
        if expression == OUTPUT_TEXT {
            return self.evaluate_output_text(source);
        }
        Ok(match self.evaluate_expression(source, expression)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Classes, properties and type aliases, without evaluating property bodies.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module).
    pub fn evaluate_schema(&self, source: &ModuleSource) -> Result<ModuleSchema, EvalError> {
        self.core.run(|vm| vm.load(source)?.schema(vm))
    }

    /// Runs the module's facts and examples.
    ///
    /// # Errors
    ///
    /// As [`evaluate_module`](Self::evaluate_module). Failing tests are
    /// reported in the results, not as an error.
    pub fn evaluate_test(
        &self,
        source: &ModuleSource,
        overwrite: bool,
    ) -> Result<TestResults, EvalError> {
        self.core.run(|vm| {
            let module = vm.load(source)?;
            let (results, logs) = vm.capture_logs(|| module.run_tests(vm, overwrite));
            let mut results = results?;
            results.logs.push_str(&logs);
            Ok(results)
        })
    }

    /// Closes the session. Idempotent; waits for a running evaluation to unwind.
    pub fn close(&self) {
        self.core.close();
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        self.core.close();
    }
}
