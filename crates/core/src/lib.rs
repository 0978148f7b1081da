pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod types;
