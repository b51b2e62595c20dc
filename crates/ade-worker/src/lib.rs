//! The worker process: durable-queue-backed environment provisioning and
//! run execution, plus periodic maintenance (lease expiry, garbage
//! collection). Ported from `ade_worker/`.

pub mod gc;
pub mod jobs;
pub mod loop_;
pub mod settings;

pub use gc::{Gc, GcCounters};
pub use jobs::{EnvironmentJob, RunJob};
pub use loop_::WorkerLoop;
pub use settings::WorkerSettings;
