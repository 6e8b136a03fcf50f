// ABOUTME: Main library module for the tokenwatch pipeline engine
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod parser;
pub mod store;
pub mod tasks;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{tick, Clock, ExecutionError, PipelineRun, StageState, TaskState};
pub use parser::{PipelineTemplate, TemplateValidator, TrackedToken};
pub use store::{FileTokenStore, TokenStore};
pub use tasks::{TaskImplementation, TaskRegistry, TokenDataSource};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
