//! Simulated server: an in-memory integer store with slow, fallible calls.
//!
//! Stands in for a remote API in demos and tests. Every call sleeps for its
//! configured delay (so paused-clock tests are deterministic), then either
//! applies its operation or fails without touching the store. The journal
//! records when each call started and how it ended.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::BoxError;
use crate::ports::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Update,
    Decrement,
}

impl Operation {
    fn apply(self, total: i64, amount: i64) -> i64 {
        match self {
            Operation::Add => total + amount,
            Operation::Update => amount,
            Operation::Decrement => total - amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    pub delay_ms: u64,
    pub fails: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            delay_ms: 1,
            fails: false,
        }
    }
}

impl CallOptions {
    pub fn delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

#[derive(Debug, Error)]
#[error("server error on `{key}`")]
pub struct SimError {
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEvent {
    Started,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub key: String,
    pub event: CallEvent,
}

#[derive(Debug, Default)]
struct Store {
    total: i64,
    journal: Vec<JournalEntry>,
}

impl Store {
    fn log(&mut self, key: &str, event: CallEvent) {
        self.journal.push(JournalEntry {
            key: key.to_string(),
            event,
        });
    }
}

/// Cheap to clone; clones share the store.
#[derive(Debug, Clone, Default)]
pub struct SimulatedServer {
    store: Arc<Mutex<Store>>,
}

impl SimulatedServer {
    pub fn new(initial: i64) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                total: initial,
                journal: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn total(&self) -> i64 {
        self.lock().total
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    pub fn started(&self, key: &str) -> bool {
        self.lock()
            .journal
            .iter()
            .any(|entry| entry.key == key && entry.event == CallEvent::Started)
    }

    /// Keys of finished or failed calls, in the order they ended.
    pub fn finish_order(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter(|entry| entry.event != CallEvent::Started)
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Perform one call. Returns the store's new total.
    pub async fn call(
        &self,
        key: &str,
        op: Operation,
        amount: i64,
        options: CallOptions,
    ) -> Result<i64, SimError> {
        self.lock().log(key, CallEvent::Started);
        tokio::time::sleep(Duration::from_millis(options.delay_ms)).await;

        let mut store = self.lock();
        if options.fails {
            store.log(key, CallEvent::Failed);
            debug!(key, ?op, amount, "simulated call failed");
            return Err(SimError {
                key: key.to_string(),
            });
        }
        store.total = op.apply(store.total, amount);
        store.log(key, CallEvent::Finished);
        debug!(key, ?op, amount, total = store.total, "simulated call finished");
        Ok(store.total)
    }

    /// A call packaged as an `Action` for submission.
    pub fn action(
        &self,
        key: impl Into<String>,
        op: Operation,
        amount: i64,
        options: CallOptions,
    ) -> Box<dyn Action<i64>> {
        Box::new(SimCall {
            server: self.clone(),
            key: key.into(),
            op,
            amount,
            options,
        })
    }
}

struct SimCall {
    server: SimulatedServer,
    key: String,
    op: Operation,
    amount: i64,
    options: CallOptions,
}

#[async_trait]
impl Action<i64> for SimCall {
    async fn run(self: Box<Self>) -> Result<i64, BoxError> {
        let SimCall {
            server,
            key,
            op,
            amount,
            options,
        } = *self;
        Ok(server.call(&key, op, amount, options).await?)
    }
}
