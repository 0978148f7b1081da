pub mod arn;
pub mod cli;

pub use cli::AwsCliOrchestrator;
