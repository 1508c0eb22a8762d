//! Tessera Runtime - module resolution and evaluation sessions.
//!
//! Embeds the evaluator of a configuration language in a host
//! application: where module and resource text may come from, who may
//! read what, and how long one evaluation may run.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  tessera-types : Value, EvaluatorId, RequestId, ErrorCode    │
//! │  tessera-auth  : SecurityPolicy, allow-lists, trust, rootDir │
//! └──────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Runtime Layer (THIS CRATE)                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  module/      : ModuleKey, ModuleKeyFactory, ModuleResolver  │
//! │  resource/    : ResourceReader, ResourceManager              │
//! │  external/    : wire protocol, ExternalReaderBridge          │
//! │  evaluator/   : EvaluatorBuilder, Evaluator, timeout race    │
//! │  interpreter/ : Interpreter contract, DataInterpreter        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! ## [`module`] - Module Resolution
//!
//! - [`ModuleResolver`](module::ModuleResolver): ordered factory chain, first claim wins
//! - [`factories`](module::factories): `pkl:`, `file:`, `http(s):`, `modulepath:`,
//!   `package:`, `projectpackage:` and external schemes
//!
//! ## [`resource`] - Resource Reads
//!
//! - [`ResourceManager`](resource::ResourceManager): dispatch by scheme, policy check, cache
//! - [`readers`](resource::readers): `env:`, `prop:`, `file:`, `http(s):` and friends
//!
//! ## [`external`] - External Readers
//!
//! - [`ExternalReaderBridge`](external::ExternalReaderBridge): multiplexed, coalescing
//!   request/response over a byte stream
//! - [`ExternalReaderProcess`](external::ExternalReaderProcess): lazily spawned child process
//!
//! ## [`evaluator`] - Sessions
//!
//! - [`EvaluatorBuilder`]: presets, setters, project application, snapshot
//! - [`Evaluator`]: one session; every operation runs under the timeout race
//!
//! # Example
//!
//! ```
//! use tessera_runtime::{EvaluatorBuilder, ModuleSource};
//!
//! let evaluator = EvaluatorBuilder::preconfigured()
//!     .set_timeout(Some(std::time::Duration::from_secs(5)))
//!     .build()
//!     .expect("valid configuration");
//! let value = evaluator
//!     .evaluate_module(&ModuleSource::text("[server]\nport = 8080\n"))
//!     .expect("evaluates");
//! assert_eq!(value.get_path(["server", "port"]), Some(&tessera_types::Value::Int(8080)));
//! ```

pub mod error;
pub mod evaluator;
pub mod external;
pub mod http;
pub mod interpreter;
pub mod interrupt;
pub mod logger;
pub mod module;
pub mod project;
pub mod resource;
pub mod schema;
pub mod source;
pub mod stack;
pub mod test_results;

// Re-exports
pub use error::{ConfigError, EvalError, ProtocolError, ResolveError, UserError, VmError};
pub use evaluator::{
    default_module_cache_dir, Evaluator, EvaluatorBuilder, EvaluatorConfig, FileOutput,
    SessionState, VmContext,
};
pub use http::HttpSettings;
pub use interpreter::{DataInterpreter, Interpreter, ModuleInstance};
pub use interrupt::Interrupt;
pub use logger::{CapturingLogger, Logger, NoopLogger, TracingLogger};
pub use project::{Project, PROJECT_FILE_NAME};
pub use schema::ModuleSchema;
pub use source::{ModuleSource, REPL_TEXT_URI};
pub use stack::{identity_transformer, replace_uri_prefix, StackFrame, StackFrameTransformer};
pub use test_results::TestResults;
