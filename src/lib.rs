pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod forecast;
pub mod llm;
pub mod metadata;
pub mod ranker;
pub mod selector;
pub mod sql;
pub mod web;
pub mod workflow;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use workflow::{Services, Workflow, WorkflowOutcome};
