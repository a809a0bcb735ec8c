//! Domain identifiers (strongly-typed IDs).
//!
//! Ids are ULIDs wrapped in `Id<T>`, where `T` is a zero-sized marker that keeps
//! a `TaskId` from being passed where a `QueueId` is expected. The marker only
//! exists at compile time; `Id<T>` has the same size as a `Ulid`.
//!
//! ## ULID の特性
//! - 生成順にソートできる（timestamp が先頭）
//! - `UlidGenerator` に `FixedClock` を渡せばテストで時刻部分を固定できる

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id kinds. Supplies the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Queue {}

impl IdMarker for Queue {
    fn prefix() -> &'static str {
        "queue-"
    }
}

/// Identifier of one submitted action.
pub type TaskId = Id<Task>;

/// Identifier of one queue engine instance.
pub type QueueId = Id<Queue>;
