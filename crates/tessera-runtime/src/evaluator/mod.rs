//! Evaluator configuration and sessions.
//!
//! ```text
//! EvaluatorBuilder ──build_config()──► EvaluatorConfig ──► Evaluator
//!   (mutable)                            (snapshot)          │
//!                                                            ├── ExecutionContext { VmContext }
//!                                                            └── TimeoutScheduler (lazy thread)
//! ```

mod builder;
mod config;
mod context;
mod output;
mod session;
mod timeout;

pub use builder::{default_module_cache_dir, EvaluatorBuilder};
pub use config::EvaluatorConfig;
pub use context::VmContext;
pub use output::FileOutput;
pub use session::{Evaluator, SessionState};
pub use timeout::TimeoutTask;
