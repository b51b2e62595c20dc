//! Spawns and supervises the `uv`/engine child processes that environment
//! and run jobs drive, draining their stdout/stderr into an NDJSON event
//! log and enforcing wall-clock deadlines.

mod event_log;
mod runner;

pub use event_log::EventLog;
pub use runner::{
    HeartbeatCallback, JsonEventCallback, SubprocessOutcome, SubprocessRunner, SubprocessSpec,
};
