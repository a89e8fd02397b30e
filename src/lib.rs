pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod profiler;
pub mod prompt;
pub mod response;
pub mod validator;

pub use engine::NlqEngine;
pub use error::NlqError;
pub use pipeline::QueryOutcome;
