//! settle-core
//!
//! Coordinates independently submitted async actions (typically network calls
//! that confirm an optimistic local change) so that unrelated actions run
//! concurrently, related ones are ordered or cancelled by name, and every caller
//! learns whether its result is the value to adopt.
//!
//! # Modules
//! - **domain**: ids, task states, submission options, outcomes, events
//! - **ports**: `Action`, `EventSink`, `IdGenerator`, `Clock`
//! - **queue**: the engine (task items, chain utilities, enqueue/drain)
//! - **group**: keyed fan-out over several queues with an aggregate busy signal
//! - **config**: queue configuration
//! - **observability**: counters for status views
//! - **sim**: an in-memory simulated server for demos and tests

pub mod config;
pub mod domain;
pub mod error;
pub mod group;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod sim;

pub use config::{QueueConfig, RunMode};
pub use domain::{
    CompleteContext, ErrorContext, QueueEvent, QueueId, Resolution, TaskId, TaskOptions,
    TaskState,
};
pub use error::{BoxError, ConfigError, TaskError};
pub use group::QueueGroup;
pub use ports::{Action, EventSink};
pub use queue::{Queue, Submission};
