// ABOUTME: Parser module for tracked-token snapshots and pipeline templates
// ABOUTME: Exports the persisted data model, template parsing and validation

pub mod error;
pub mod template;
pub mod token;
pub mod validation;

pub use error::{ParserError, ValidationError};
pub use template::PipelineTemplate;
pub use token::{Repetitions, StageRecord, TaskRecord, TokenRef, TrackedToken};
pub use validation::{TemplateValidator, ValidationReport};
