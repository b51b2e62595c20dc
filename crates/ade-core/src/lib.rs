//! Shared primitives for the ADE control plane: typed ids, a testable clock,
//! the error taxonomy every other crate maps into, and the NDJSON event
//! record shared by the subprocess runner and the worker's job log.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod clock;
mod error;
mod event;
mod ids;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, ProblemType, Result};
pub use event::{Event, EventLevel};
pub use ids::{
    ApiKeyId, ConfigurationId, DocumentId, EnvironmentId, RunId, SessionId, UserId, WorkspaceId,
};
