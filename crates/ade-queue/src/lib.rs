//! Durable, lease-based work queues for environments and runs, backed by
//! Postgres, plus a best-effort `LISTEN`/`NOTIFY` wake signal.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backoff;
pub mod environment;
pub mod run;
pub mod wake;

pub use backoff::capped_exponential;
pub use environment::{EnvironmentClaim, EnvironmentQueue};
pub use run::{RunClaim, RunQueue};
pub use wake::{RunQueueListener, WakeSignal, RUN_QUEUED_CHANNEL};
