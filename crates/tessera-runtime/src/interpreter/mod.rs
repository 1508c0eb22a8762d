//! The interpreter collaborator.
//!
//! The session never looks inside a module. It hands the resolved
//! module to an [`Interpreter`], gets back a [`ModuleInstance`], and
//! asks that instance for one output shape. Interpreters reach the
//! outside world only through [`VmContext`], which applies the policy,
//! caches imports and exposes the cancellation points.
//!
//! | Session operation | Instance method |
//! |-------------------|-----------------|
//! | `evaluate_module` | [`force`](ModuleInstance::force) + [`export`](ModuleInstance::export) |
//! | `evaluate_output_text` | [`output_text`](ModuleInstance::output_text) |
//! | `evaluate_output_value` | [`output_value`](ModuleInstance::output_value) |
//! | `evaluate_output_files` | [`output_file_names`](ModuleInstance::output_file_names), then [`output_file_text`](ModuleInstance::output_file_text) per entry |
//! | `evaluate_expression` | [`evaluate_expression`](ModuleInstance::evaluate_expression) |
//! | `evaluate_schema` | [`schema`](ModuleInstance::schema) |
//! | `evaluate_test` | [`run_tests`](ModuleInstance::run_tests) |

mod data;

pub use data::DataInterpreter;

use crate::error::VmError;
use crate::evaluator::VmContext;
use crate::module::ResolvedModule;
use crate::schema::ModuleSchema;
use crate::test_results::TestResults;
use std::fmt::Debug;
use std::sync::Arc;
use tessera_types::Value;
use url::Url;

/// Turns module text into an evaluable instance.
pub trait Interpreter: Send + Sync + Debug {
    /// # Errors
    ///
    /// [`VmError::Eval`] for malformed module text; [`VmError::Bug`] for
    /// states the interpreter cannot attribute to the module.
    fn load(&self, vm: &VmContext, module: &ResolvedModule)
        -> Result<Arc<dyn ModuleInstance>, VmError>;
}

/// A loaded module.
///
/// Every method may fail with [`VmError::Cancelled`] once the session
/// is force-closed.
pub trait ModuleInstance: Send + Sync + Debug {
    /// Resolved URI; relative imports are joined against it.
    fn uri(&self) -> &Url;

    /// Evaluates every member, failing on the first error.
    ///
    /// # Errors
    ///
    /// Any evaluation failure.
    fn force(&self, vm: &VmContext) -> Result<(), VmError>;

    /// # Errors
    ///
    /// Any evaluation failure.
    fn export(&self, vm: &VmContext) -> Result<Value, VmError>;

    /// Evaluates the member at `path`; an empty path is the whole module.
    ///
    /// # Errors
    ///
    /// [`VmError::Eval`] if a segment does not exist.
    fn read_member(&self, vm: &VmContext, path: &[&str]) -> Result<Value, VmError>;

    /// `output.text`, rendering `output.value` when no text is given.
    ///
    /// # Errors
    ///
    /// Any evaluation or rendering failure.
    fn output_text(&self, vm: &VmContext) -> Result<String, VmError>;

    /// `output.value`, defaulting to the module itself.
    ///
    /// # Errors
    ///
    /// Any evaluation failure.
    fn output_value(&self, vm: &VmContext) -> Result<Value, VmError>;

    /// Names of the `output.files` entries, without evaluating them.
    ///
    /// # Errors
    ///
    /// Any evaluation failure of `output.files` itself.
    fn output_file_names(&self, vm: &VmContext) -> Result<Vec<String>, VmError>;

    /// Renders one `output.files` entry.
    ///
    /// # Errors
    ///
    /// [`VmError::Eval`] for an unknown entry or a rendering failure.
    fn output_file_text(&self, vm: &VmContext, name: &str) -> Result<String, VmError>;

    /// # Errors
    ///
    /// Any evaluation failure, or a malformed expression.
    fn evaluate_expression(&self, vm: &VmContext, expression: &str) -> Result<Value, VmError>;

    /// Structure only; property bodies are not evaluated.
    ///
    /// # Errors
    ///
    /// Malformed class or type alias declarations.
    fn schema(&self, vm: &VmContext) -> Result<ModuleSchema, VmError>;

    /// Runs facts and examples. `overwrite` rewrites expected example output.
    ///
    /// # Errors
    ///
    /// Failures outside individual tests; a failing test is a result, not an error.
    fn run_tests(&self, vm: &VmContext, overwrite: bool) -> Result<TestResults, VmError>;
}
