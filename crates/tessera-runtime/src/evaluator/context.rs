//! The long-lived execution context of a session.
//!
//! [`VmContext`] is what interpreters see. [`ExecutionContext`] wraps it
//! with the enter/leave gate that keeps evaluations one at a time and
//! lets a forced close wait for the running evaluation to unwind.
//!
//! ```text
//! run() ── enter() ──► Entered ── thunk(&VmContext) ──► drop: leave()
//!                           ▲
//! force_close() ── closed=true, interrupt ──┘ waits until left
//! ```

use crate::error::{EvalError, ResolveError, VmError};
use crate::interpreter::{Interpreter, ModuleInstance};
use crate::interrupt::Interrupt;
use crate::logger::{CapturingLogger, Logger};
use crate::module::{ModuleKey, ModuleResolver, ResolveContext};
use crate::resource::{Resource, ResourceManager};
use crate::source::ModuleSource;
use crate::stack::StackFrame;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use url::Url;

// ─── VmContext ──────────────────────────────────────────────────────

/// Services available to an interpreter during one session.
pub struct VmContext {
    resolver: ModuleResolver,
    resources: ResourceManager,
    resolve: ResolveContext,
    interpreter: Arc<dyn Interpreter>,
    logger: Arc<dyn Logger>,
    capture: Mutex<Option<Arc<CapturingLogger>>>,
    output_format: Option<String>,
    color: bool,
    modules: Mutex<HashMap<Url, Arc<dyn ModuleInstance>>>,
}

impl fmt::Debug for VmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmContext")
            .field("resolver", &self.resolver)
            .field("interpreter", &self.interpreter)
            .field("output_format", &self.output_format)
            .field("cached_modules", &self.modules.lock().len())
            .finish_non_exhaustive()
    }
}

impl VmContext {
    pub(crate) fn new(
        resolver: ModuleResolver,
        resources: ResourceManager,
        resolve: ResolveContext,
        interpreter: Arc<dyn Interpreter>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            resolver,
            resources,
            resolve,
            interpreter,
            logger,
            capture: Mutex::new(None),
            output_format: None,
            color: false,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn with_output(mut self, output_format: Option<String>, color: bool) -> Self {
        self.output_format = output_format;
        self.color = color;
        self
    }

    /// Resolves and loads a root module.
    ///
    /// # Errors
    ///
    /// Resolution, policy or interpreter failures.
    pub fn load(&self, source: &ModuleSource) -> Result<Arc<dyn ModuleInstance>, VmError> {
        self.check_interrupted()?;
        let key = self.resolver.resolve(source)?;
        self.load_key(key.as_ref())
    }

    /// Imports `spec`, joined against the importing module's URI.
    ///
    /// The import is checked against the policy's trust levels before
    /// anything is resolved.
    ///
    /// # Errors
    ///
    /// [`VmError::Denied`] on insufficient trust, otherwise resolution
    /// or interpreter failures.
    pub fn import(&self, importing: &Url, spec: &str) -> Result<Arc<dyn ModuleInstance>, VmError> {
        self.check_interrupted()?;
        let imported = join(importing, spec)?;
        self.resolve.policy().check_import_module(importing, &imported)?;
        let key = self.resolver.resolve_uri(&imported)?;
        self.load_key(key.as_ref())
    }

    fn load_key(&self, key: &dyn ModuleKey) -> Result<Arc<dyn ModuleInstance>, VmError> {
        let module = key.resolve(&self.resolve)?;
        if !key.is_cached() {
            return self.interpreter.load(self, &module);
        }
        let cached = self.modules.lock().get(module.resolved_uri()).cloned();
        if let Some(instance) = cached {
            return Ok(instance);
        }
        // Not held across load: loading may import.
        let instance = self.interpreter.load(self, &module)?;
        let mut modules = self.modules.lock();
        let entry = modules
            .entry(module.resolved_uri().clone())
            .or_insert(instance);
        tracing::debug!(uri = %module.resolved_uri(), "module cached");
        Ok(Arc::clone(entry))
    }

    /// Reads the resource `spec`, joined against `importing`.
    ///
    /// # Errors
    ///
    /// Policy, reader, or not-found failures.
    pub fn read_resource(&self, importing: &Url, spec: &str) -> Result<Resource, VmError> {
        self.check_interrupted()?;
        let uri = join(importing, spec)?;
        Ok(self.resources.read(&uri, &self.resolve)?)
    }

    #[must_use]
    pub fn env(&self, name: &str) -> Option<&str> {
        self.resolve.env().get(name).map(String::as_str)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.resolve.properties().get(name).map(String::as_str)
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
    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    #[must_use]
    pub fn resolve_context(&self) -> &ResolveContext {
        &self.resolve
    }

    pub fn trace(&self, message: &str, frame: &StackFrame) {
        self.logger.trace(message, frame);
        if let Some(capture) = self.capture.lock().as_ref() {
            capture.trace(message, frame);
        }
    }

    pub fn warn(&self, message: &str, frame: &StackFrame) {
        self.logger.warn(message, frame);
        if let Some(capture) = self.capture.lock().as_ref() {
            capture.warn(message, frame);
        }
    }

    /// Runs `f`, also collecting every module log line it emits.
    pub fn capture_logs<R>(&self, f: impl FnOnce() -> R) -> (R, String) {
        let capture = Arc::new(CapturingLogger::new());
        let previous = self.capture.lock().replace(Arc::clone(&capture));
        let result = f();
        *self.capture.lock() = previous;
        (result, capture.take())
    }

    /// Cancellation point.
    ///
    /// # Errors
    ///
    /// [`VmError::Cancelled`] once the session is being force-closed.
    pub fn check_interrupted(&self) -> Result<(), VmError> {
        if self.resolve.interrupt().is_triggered() {
            return Err(VmError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps, waking early on forced close.
    ///
    /// # Errors
    ///
    /// [`VmError::Cancelled`] if the sleep was interrupted.
    pub fn sleep_interruptibly(&self, duration: Duration) -> Result<(), VmError> {
        if self.resolve.interrupt().sleep(duration) {
            return Err(VmError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn interrupt(&self) -> &Interrupt {
        self.resolve.interrupt()
    }

    /// Releases backends. Best-effort; failures are logged by each layer.
    pub(crate) fn close(&self) {
        self.resolver.close();
        self.resources.close();
        self.resolve.packages().close();
        self.modules.lock().clear();
    }
}

fn join(base: &Url, spec: &str) -> Result<Url, ResolveError> {
    base.join(spec)
        .map_err(|e| ResolveError::invalid_uri(spec, format!("cannot resolve against `{base}`: {e}")))
}

// ─── ExecutionContext ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct Gate {
    owner: Option<ThreadId>,
    closed: bool,
}

/// One-at-a-time access to a [`VmContext`].
#[derive(Debug)]
pub(crate) struct ExecutionContext {
    vm: VmContext,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl ExecutionContext {
    pub(crate) fn new(vm: VmContext) -> Self {
        Self {
            vm,
            gate: Mutex::new(Gate::default()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn vm(&self) -> &VmContext {
        &self.vm
    }

    /// Waits for any evaluation on another thread to leave, then enters.
    ///
    /// # Errors
    ///
    /// [`EvalError::SessionUnavailable`] once closed; [`EvalError::Bug`]
    /// when the current thread is already inside.
    pub(crate) fn enter(&self) -> Result<Entered<'_>, EvalError> {
        let me = std::thread::current().id();
        let mut gate = self.gate.lock();
        loop {
            if gate.closed {
                return Err(EvalError::SessionUnavailable);
            }
            match gate.owner {
                None => break,
                Some(owner) if owner == me => {
                    return Err(EvalError::Bug {
                        message: "evaluation re-entered the session from inside an evaluation"
                            .into(),
                    });
                }
                Some(_) => self.changed.wait(&mut gate),
            }
        }
        gate.owner = Some(me);
        Ok(Entered { context: self })
    }

    fn leave(&self) {
        let mut gate = self.gate.lock();
        gate.owner = None;
        self.changed.notify_all();
    }

    /// Closes the gate, interrupts the running evaluation and waits for
    /// it to leave. Never waits on the calling thread's own evaluation.
    pub(crate) fn force_close(&self) {
        let me = std::thread::current().id();
        let mut gate = self.gate.lock();
        gate.closed = true;
        self.vm.interrupt().trigger();
        self.changed.notify_all();
        while gate.owner.is_some_and(|owner| owner != me) {
            self.changed.wait(&mut gate);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.gate.lock().closed
    }
}

/// Proof of being inside the context. Leaves on drop.
pub(crate) struct Entered<'a> {
    context: &'a ExecutionContext,
}

impl Entered<'_> {
    pub(crate) fn vm(&self) -> &VmContext {
        &self.context.vm
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.context.leave();
    }
}
