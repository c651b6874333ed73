pub mod client;
pub mod engine;
pub mod evaluator;
pub mod orchestrator;
pub mod runner;
pub mod supervisor;
pub mod worker;
