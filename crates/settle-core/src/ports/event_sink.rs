//! EventSink port - busy/idle observers.
//!
//! # 設計
//! - エッジ（StartProcess / EndProcess）の順序はカウンタを更新したロックの中で決まる。
//!   `Emitter::enqueue` はそのロックを保持したまま呼ぶこと。
//! - 配信はロックの外で行う。同時に配信できるのは 1 スレッドだけで、
//!   配信中に積まれたイベントも同じスレッドが順番どおりに流す。
//! - sink から同じキューへ再投入しても、配信ロックを握ったままにはならないので
//!   デッドロックしない。

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::domain::QueueEvent;

/// Receives `StartProcess` / `EndProcess` edges.
///
/// Called outside the engine lock, in the order the edges happened.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &QueueEvent);
}

impl<F> EventSink for F
where
    F: Fn(&QueueEvent) + Send + Sync,
{
    fn emit(&self, event: &QueueEvent) {
        self(event)
    }
}

#[derive(Default)]
struct Outbox {
    pending: VecDeque<QueueEvent>,
    flushing: bool,
}

/// Registered sinks plus an ordered outbox of not-yet-delivered events.
#[derive(Default)]
pub(crate) struct Emitter {
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
    outbox: Mutex<Outbox>,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an edge. Call while holding the lock that ordered it.
    pub(crate) fn enqueue(&self, event: QueueEvent) {
        self.lock_outbox().pending.push_back(event);
    }

    /// Deliver queued edges in order.
    ///
    /// Returns immediately when another thread is already delivering; that
    /// thread picks up whatever was queued here.
    pub(crate) fn flush(&self) {
        let mut batch = {
            let mut outbox = self.lock_outbox();
            if outbox.flushing || outbox.pending.is_empty() {
                return;
            }
            outbox.flushing = true;
            std::mem::take(&mut outbox.pending)
        };

        loop {
            let sinks = self
                .sinks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for event in &batch {
                for sink in &sinks {
                    if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
                        warn!(queue = %event.queue(), ?event, "event sink panicked");
                    }
                }
            }

            let mut outbox = self.lock_outbox();
            if outbox.pending.is_empty() {
                outbox.flushing = false;
                return;
            }
            batch = std::mem::take(&mut outbox.pending);
        }
    }
}
