//! Ports: the seams between the engine and the outside world.
//!
//! - **Action**: the caller's opaque async operation
//! - **EventSink**: receives busy/idle signals
//! - **IdGenerator** / **Clock**: id generation, swappable in tests

pub mod action;
pub mod clock;
pub mod event_sink;
pub mod id_generator;

pub use self::action::Action;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub(crate) use self::event_sink::Emitter;
pub use self::id_generator::{IdGenerator, UlidGenerator};
