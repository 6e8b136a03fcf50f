// ABOUTME: Pipeline execution engine for tracked token evaluation
// ABOUTME: Handles task state machines, per-tick memoization, stage gating and pipeline advancement

pub mod clock;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ContextExecutor, TaskLookup, TaskMap};
pub use error::{ExecutionError, Result};
pub use pipeline::{tick, PipelineRun};
pub use stage::{StageGate, StageState};
pub use task::{CheckScope, TaskState, TaskUnit};
