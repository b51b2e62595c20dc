pub mod environment;
pub mod run;
pub mod run_results;

pub use environment::EnvironmentJob;
pub use run::RunJob;
