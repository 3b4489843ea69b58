pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod workflow;
