//! Keeps a project's workflow phase in step with the jobs that drive it.
//!
//! [`WorkflowCoordinator`] validates requests and enqueues jobs;
//! [`WorkflowProcessor`] runs them against the LLM and the repository.

pub mod coordinator;
pub mod error;
pub mod payload;
pub mod processor;
mod prompts;
pub mod report;

pub use coordinator::*;
pub use error::*;
pub use payload::*;
pub use processor::*;
