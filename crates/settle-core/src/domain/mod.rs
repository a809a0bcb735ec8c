//! Domain model (ids, task states, submission options, outcomes, events).

pub mod events;
pub mod ids;
pub mod options;
pub mod outcome;
pub mod state;

pub use events::QueueEvent;
pub use ids::{QueueId, TaskId};
pub use options::{OnComplete, OnError, TaskOptions};
pub use outcome::{CompleteContext, ErrorContext, Resolution};
pub use state::TaskState;
