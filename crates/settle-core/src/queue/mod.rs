//! Queue module: task items, the submission-order chain, and the engine.

mod chain;
mod engine;
mod item;

pub use chain::Chain;
pub use engine::{Queue, Submission};
pub use item::TaskItem;
