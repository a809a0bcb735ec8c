//! Queue engine: submission (enqueue), drain, settlement and promotion.
//!
//! # 設計
//! - 状態（チェーン・待ち行列・未解決数）はすべて `QueueState` にあり、
//!   `std::sync::Mutex` 1 本で守る。ロック中に `.await` はしない。
//! - ロック中は「何をするか」だけを `Effects` に集める。
//!   アクションの spawn、コールバック、ハンドルの解決はロックを外してから行う。
//!   これでコールバックから同じキューへ再投入できる。
//! - busy/idle のエッジはカウンタを更新したロックの中で `Emitter` に積む。
//!   配信順はカウンタの更新順と一致する（マルチスレッドでも逆転しない）。
//!
//! # 実装
//! - enqueue: 末尾が待機中ならブロック。同名で `can_replace` なら末尾を置き換える。
//! - drain: 待ち行列の先頭から、開始・キャンセル・ブロックを判定する。
//!   ブロックした時点で止まる。開始したものは止めない（無関係な後続も並行に走る）。
//! - settle: 先行に Pending が残っていれば PartialComplete、なければ Complete。
//!   確定したら後続の PartialComplete を昇格させる。
//! - prune: 誰も参照しなくなった確定済みの先頭を捨てる（末尾は残す）。

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::chain::Chain;
use super::item::TaskItem;
use crate::config::QueueConfig;
use crate::domain::{
    CompleteContext, ErrorContext, OnComplete, OnError, QueueEvent, QueueId, Resolution, TaskId,
    TaskOptions, TaskState,
};
use crate::error::{BoxError, TaskError};
use crate::observability::QueueCounts;
use crate::ports::{Action, Emitter, EventSink, IdGenerator, SystemClock, UlidGenerator};

type Settlement<V> = Result<Resolution<V>, TaskError>;

/// Caller-side half of a submission: callbacks plus the handle's sender.
struct Responder<V> {
    tx: oneshot::Sender<Settlement<V>>,
    on_complete: Option<OnComplete<V>>,
    on_error: Option<OnError<V>>,
}

/// Entry of the waiting collection (FIFO by submission order).
struct Waiting<V> {
    id: TaskId,
    responder: Responder<V>,
}

/// An item whose action is ready to be spawned.
struct Started<V> {
    id: TaskId,
    name: String,
    action: Box<dyn Action<V>>,
    responder: Responder<V>,
}

/// A resolution decided under the lock, delivered after it is released.
enum Delivery<V> {
    Complete {
        responder: Responder<V>,
        value: V,
        context: CompleteContext,
    },
    Error {
        responder: Responder<V>,
        error: TaskError,
        context: ErrorContext<V>,
    },
    Superseded {
        responder: Responder<V>,
    },
    Dropped {
        responder: Responder<V>,
    },
}

impl<V> Delivery<V> {
    fn deliver(self) {
        match self {
            Delivery::Complete {
                responder,
                value,
                context,
            } => {
                if let Some(on_complete) = responder.on_complete {
                    guarded("on_complete", || on_complete(&value, context));
                }
                let _ = responder.tx.send(Ok(Resolution::Value(value)));
            }
            Delivery::Error {
                responder,
                error,
                context,
            } => {
                if let Some(on_error) = responder.on_error {
                    guarded("on_error", || on_error(&error, context));
                }
                let _ = responder.tx.send(Err(error));
            }
            Delivery::Superseded { responder } => {
                let _ = responder.tx.send(Ok(Resolution::Superseded));
            }
            Delivery::Dropped { responder } => {
                let _ = responder.tx.send(Err(TaskError::Dropped));
            }
        }
    }
}

/// Runs a caller callback; a panic is logged and the handle still resolves.
fn guarded(callback: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(callback, "callback panicked");
    }
}

/// Side effects collected while the state lock is held.
struct Effects<V> {
    started: Vec<Started<V>>,
    deliveries: Vec<Delivery<V>>,
}

impl<V> Effects<V> {
    fn new() -> Self {
        Self {
            started: Vec::new(),
            deliveries: Vec::new(),
        }
    }
}

/// What the drain does with the head of the waiting collection.
#[derive(Debug, PartialEq, Eq)]
enum Admission {
    Run,
    Block,
    Cancel { dependency: String },
    Discard,
}

/// Engine state. Exclusively owned by one `Queue`; every method is synchronous.
struct QueueState<V> {
    queue: QueueId,

    chain: Chain<V>,

    /// Not-yet-dequeued submissions, oldest first.
    waiting: VecDeque<Waiting<V>>,

    /// Value of the most recent successful settlement.
    last_settled: Option<V>,

    /// Submissions not yet resolved to their caller.
    outstanding: usize,
}

impl<V: Clone + Send + 'static> QueueState<V> {
    fn new(queue: QueueId) -> Self {
        Self {
            queue,
            chain: Chain::new(),
            waiting: VecDeque::new(),
            last_settled: None,
            outstanding: 0,
        }
    }

    /// Link a new item behind the tail, blocking or superseding as the tail dictates.
    fn enqueue(&mut self, mut item: TaskItem<V>, responder: Responder<V>, fx: &mut Effects<V>) {
        let mut superseded = None;

        if let Some(tail) = self.chain.tail().and_then(|t| self.chain.get(t)) {
            if tail.is_waiting() {
                item.mark_blocked();
                if tail.can_replace() && tail.name() == item.name() {
                    superseded = Some(tail.id());
                }
            } else if tail.state().is_any(&[
                TaskState::Blocked,
                TaskState::Pending,
                TaskState::PartialComplete,
            ]) && item.has_wait_relation_to(tail.name())
            {
                item.mark_blocked();
            }
        }

        debug!(
            queue = %self.queue,
            task = %item.id(),
            name = item.name(),
            state = ?item.state(),
            "task enqueued"
        );

        match superseded {
            Some(old) => self.supersede(old, item, responder, fx),
            None => self.push_waiting(item, responder),
        }
    }

    fn push_waiting(&mut self, item: TaskItem<V>, responder: Responder<V>) {
        let id = item.id();
        self.chain.append(item);
        self.waiting.push_back(Waiting { id, responder });
    }

    /// Replace the still-waiting tail `old` with `item`; `old` never runs.
    fn supersede(
        &mut self,
        old: TaskId,
        item: TaskItem<V>,
        responder: Responder<V>,
        fx: &mut Effects<V>,
    ) {
        let id = item.id();
        let item = match self.chain.replace(old, item) {
            Ok(_) => None,
            Err(item) => Some(item),
        };
        if let Some(item) = item {
            warn!(queue = %self.queue, task = %old, "superseded task missing from chain");
            self.push_waiting(item, responder);
            return;
        }

        match self.waiting.iter().rposition(|w| w.id == old) {
            Some(pos) => {
                let replaced = std::mem::replace(&mut self.waiting[pos], Waiting { id, responder });
                debug!(queue = %self.queue, task = %old, by = %id, "task superseded");
                fx.deliveries.push(Delivery::Superseded {
                    responder: replaced.responder,
                });
            }
            None => {
                warn!(queue = %self.queue, task = %old, "superseded task was not waiting");
                self.waiting.push_back(Waiting { id, responder });
            }
        }
    }

    fn admission(&self, head: TaskId) -> Admission {
        let Some(item) = self.chain.get(head) else {
            return Admission::Discard;
        };
        let Some(prev) = item.prev().and_then(|p| self.chain.get(p)) else {
            return Admission::Run;
        };

        if prev.is_blocked() {
            return Admission::Block;
        }
        if item.has_wait_relation_to(prev.name())
            && self
                .chain
                .find_item_by_state(Some(prev.id()), TaskState::PASSABLE)
                .is_some_and(|ancestor| ancestor.is_pending())
        {
            return Admission::Block;
        }
        if prev.is_partial_complete() {
            return Admission::Block;
        }
        if item.has_dependency_on(prev.name()) && prev.state().is_any(TaskState::FAILED) {
            return Admission::Cancel {
                dependency: prev.name().to_string(),
            };
        }
        Admission::Run
    }

    /// Start or cancel eligible items from the head of the waiting collection.
    ///
    /// Stops at the first head that must keep waiting. Started items do not
    /// stop the drain, so unrelated successors start alongside them.
    fn process_queue(&mut self, fx: &mut Effects<V>) {
        while let Some(head) = self.waiting.front().map(|w| w.id) {
            let admission = self.admission(head);
            if admission == Admission::Block {
                if let Some(item) = self.chain.get_mut(head) {
                    item.mark_blocked();
                }
                return;
            }

            let Some(Waiting { id, responder }) = self.waiting.pop_front() else {
                return;
            };
            let tail = self.chain.tail();
            let Some(item) = self.chain.get_mut(id) else {
                warn!(queue = %self.queue, task = %id, "waiting task missing from chain");
                fx.deliveries.push(Delivery::Dropped { responder });
                continue;
            };

            match admission {
                Admission::Cancel { dependency } => {
                    item.mark_cancelled();
                    debug!(queue = %self.queue, task = %id, %dependency, "task cancelled");
                    fx.deliveries.push(Delivery::Error {
                        responder,
                        error: TaskError::Cancelled { dependency },
                        context: ErrorContext {
                            is_final: tail == Some(id),
                            last_value: self.last_settled.clone(),
                        },
                    });
                }
                _ => {
                    let name = item.name().to_string();
                    match item.start_running() {
                        Some(action) => {
                            debug!(queue = %self.queue, task = %id, %name, "task started");
                            fx.started.push(Started {
                                id,
                                name,
                                action,
                                responder,
                            });
                        }
                        None => {
                            warn!(
                                queue = %self.queue,
                                task = %id,
                                "task has no action left to run"
                            );
                            item.mark_error();
                            fx.deliveries.push(Delivery::Dropped { responder });
                            self.chain.promote_from(id);
                        }
                    }
                }
            }
        }
    }

    /// Record the outcome of a finished action and promote what it unblocks.
    fn settle(
        &mut self,
        id: TaskId,
        responder: Responder<V>,
        result: Result<V, BoxError>,
        fx: &mut Effects<V>,
    ) {
        let Some(prev) = self.chain.get(id).map(|item| item.prev()) else {
            warn!(queue = %self.queue, task = %id, "settled task missing from chain");
            fx.deliveries.push(Delivery::Dropped { responder });
            return;
        };

        match result {
            Ok(value) => {
                self.last_settled = Some(value.clone());
                let provisional = prev
                    .and_then(|p| self.chain.get(p))
                    .is_some_and(|p| p.is_partial_complete())
                    || self.chain.find_pending(prev);

                if let Some(item) = self.chain.get_mut(id) {
                    item.value = Some(value.clone());
                    if provisional {
                        item.mark_partial_complete();
                    } else {
                        item.mark_complete();
                    }
                }

                let is_final = self.is_final_success(id);
                debug!(queue = %self.queue, task = %id, provisional, is_final, "task completed");
                fx.deliveries.push(Delivery::Complete {
                    responder,
                    value,
                    context: CompleteContext { is_final },
                });

                if !provisional {
                    self.promote(id);
                }
            }
            Err(error) => {
                if let Some(item) = self.chain.get_mut(id) {
                    item.mark_error();
                }
                let is_final = self.chain.tail() == Some(id);
                debug!(queue = %self.queue, task = %id, is_final, %error, "task failed");
                fx.deliveries.push(Delivery::Error {
                    responder,
                    error: TaskError::failed(error),
                    context: ErrorContext {
                        is_final,
                        last_value: self.last_settled.clone(),
                    },
                });
                self.promote(id);
            }
        }
    }

    fn promote(&mut self, from: TaskId) {
        let promoted = self.chain.promote_from(from);
        if !promoted.is_empty() {
            debug!(
                queue = %self.queue,
                task = %from,
                promoted = ?promoted,
                "partial results promoted"
            );
        }
    }

    /// Whether a successful item's value is the one to treat as current truth:
    /// it is the tail and not provisional, or every later result up to the
    /// tail is provisional or failed.
    fn is_final_success(&self, id: TaskId) -> bool {
        let (Some(item), Some(tail)) = (self.chain.get(id), self.chain.tail()) else {
            return false;
        };
        if tail == id && !item.is_partial_complete() {
            return true;
        }
        item.next()
            .and_then(|n| self.chain.get(n))
            .is_some_and(|next| {
                next.state()
                    .is_any(&[TaskState::PartialComplete, TaskState::Error])
                    && self.chain.reaches(Some(next.id()), tail)
            })
    }

    /// Drop settled items from the head of the chain once nothing waiting can
    /// consult them. The tail is always kept.
    fn prune(&mut self) {
        while let Some(head) = self.chain.head() {
            if Some(head) == self.chain.tail() {
                break;
            }
            let Some(item) = self.chain.get(head) else {
                break;
            };
            if !item.state().is_settled() {
                break;
            }
            let successor_waiting = item
                .next()
                .and_then(|n| self.chain.get(n))
                .is_some_and(|next| next.is_waiting());
            if successor_waiting {
                break;
            }
            self.chain.pop_head();
            debug!(
                queue = %self.queue,
                task = %head,
                retained = self.chain.len(),
                "task released"
            );
        }
    }

    fn counts_by_state(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for item in self.chain.iter() {
            counts.record(item.state());
        }
        counts
    }
}

struct Shared<V> {
    id: QueueId,
    config: QueueConfig,
    ids: Arc<dyn IdGenerator>,
    state: Mutex<QueueState<V>>,
    events: Emitter,

    /// `true` while submissions are outstanding. Updated under the state lock.
    busy: watch::Sender<bool>,
}

impl<V: Clone + Send + 'static> Shared<V> {
    fn lock_state(&self) -> MutexGuard<'_, QueueState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip the busy signal and queue the matching edge. Call under the state lock.
    fn edge(&self, busy: bool) {
        self.busy.send_replace(busy);
        if busy {
            info!(queue = %self.config.label, "queue busy");
            self.events.enqueue(QueueEvent::StartProcess { queue: self.id });
        } else {
            info!(queue = %self.config.label, "queue idle");
            self.events.enqueue(QueueEvent::EndProcess { queue: self.id });
        }
    }

    /// Emit queued edges, spawn started actions, deliver resolutions, then
    /// account for them.
    fn apply(self: &Arc<Self>, fx: Effects<V>) {
        let Effects {
            started,
            deliveries,
        } = fx;

        self.events.flush();

        for task in started {
            self.spawn(task);
        }

        let resolved = deliveries.len();
        for delivery in deliveries {
            delivery.deliver();
        }

        if resolved > 0 {
            {
                let mut state = self.lock_state();
                state.outstanding = state.outstanding.saturating_sub(resolved);
                if state.outstanding == 0 {
                    self.edge(false);
                }
            }
            self.events.flush();
        }
    }

    fn spawn(self: &Arc<Self>, task: Started<V>) {
        let span = info_span!(
            "task",
            queue = %self.config.label,
            id = %task.id,
            name = %task.name
        );
        tokio::spawn(run_action(Arc::clone(self), task).instrument(span));
    }
}

async fn run_action<V: Clone + Send + 'static>(shared: Arc<Shared<V>>, task: Started<V>) {
    let Started {
        id,
        action,
        responder,
        ..
    } = task;
    let result = action.run().await;

    let mut fx = Effects::new();
    {
        let mut state = shared.lock_state();
        state.settle(id, responder, result, &mut fx);
        state.process_queue(&mut fx);
        state.prune();
    }
    shared.apply(fx);
}

/// Handle to one submission. Resolves exactly once.
#[derive(Debug)]
pub struct Submission<V> {
    id: TaskId,
    rx: oneshot::Receiver<Settlement<V>>,
}

impl<V> Submission<V> {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<V> Future for Submission<V> {
    type Output = Settlement<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TaskError::Dropped)))
    }
}

/// Coordinates submitted actions by name relationships.
///
/// Cloning is cheap; clones share the same engine. In `RunMode::Auto`,
/// `add` must be called from within a Tokio runtime because started actions
/// are spawned onto it.
pub struct Queue<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Queue<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: Clone + Send + 'static> Queue<V> {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_id_generator(config, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(config: QueueConfig, ids: Arc<dyn IdGenerator>) -> Self {
        let id = ids.generate_queue_id();
        let (busy, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                id,
                config,
                ids,
                state: Mutex::new(QueueState::new(id)),
                events: Emitter::new(),
                busy,
            }),
        }
    }

    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Submit an action. In auto mode the queue drains immediately.
    pub fn add(&self, options: TaskOptions<V>) -> Submission<V> {
        let id = self.shared.ids.generate_task_id();
        let (tx, rx) = oneshot::channel();
        let TaskOptions {
            name,
            action,
            depends_on,
            waits_for,
            can_replace,
            on_complete,
            on_error,
        } = options;
        let item = TaskItem::new(id, name, action, depends_on, waits_for, can_replace);
        let responder = Responder {
            tx,
            on_complete,
            on_error,
        };

        let mut fx = Effects::new();
        {
            let mut state = self.shared.lock_state();
            if state.outstanding == 0 {
                self.shared.edge(true);
            }
            state.outstanding += 1;
            state.enqueue(item, responder, &mut fx);
            if !self.shared.config.is_manual() {
                state.process_queue(&mut fx);
            }
        }
        self.shared.apply(fx);

        Submission { id, rx }
    }

    /// One drain attempt. A no-op when nothing is waiting.
    pub fn drain(&self) {
        let mut fx = Effects::new();
        {
            let mut state = self.shared.lock_state();
            state.process_queue(&mut fx);
            state.prune();
        }
        self.shared.apply(fx);
    }

    /// Drain, then wait until every submission has resolved.
    pub async fn run(&self) {
        self.drain();
        self.wait_idle().await;
    }

    pub async fn wait_idle(&self) {
        let mut busy = self.shared.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub fn is_busy(&self) -> bool {
        *self.shared.busy.borrow()
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.shared.busy.subscribe()
    }

    pub fn add_listener(&self, sink: Arc<dyn EventSink>) {
        self.shared.events.add_sink(sink);
    }

    pub fn outstanding(&self) -> usize {
        self.shared.lock_state().outstanding
    }

    /// State of a retained item. Settled items are released once nothing can
    /// consult them, so `None` means unknown or already released.
    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.shared.lock_state().chain.get(id).map(|item| item.state())
    }

    /// Value a retained item settled with, provisional or not.
    pub fn value_of(&self, id: TaskId) -> Option<V> {
        self.shared
            .lock_state()
            .chain
            .get(id)
            .and_then(|item| item.value().cloned())
    }

    pub fn last_settled_value(&self) -> Option<V> {
        self.shared.lock_state().last_settled.clone()
    }

    pub fn counts_by_state(&self) -> QueueCounts {
        self.shared.lock_state().counts_by_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    type Call = Pin<Box<dyn Future<Output = Result<i64, BoxError>> + Send>>;

    fn after(ms: u64, value: i64) -> impl FnOnce() -> Call + Send + 'static {
        move || -> Call {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(value)
            })
        }
    }

    fn fail_after(ms: u64) -> impl FnOnce() -> Call + Send + 'static {
        move || -> Call {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Err(BoxError::from("server error"))
            })
        }
    }

    fn auto() -> Queue<i64> {
        Queue::new(QueueConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_actions_run_concurrently() {
        let queue = auto();

        let a = queue.add(TaskOptions::new("a", after(100, 1)));
        let b = queue.add(TaskOptions::new("b", after(100, 2)));

        assert_eq!(queue.counts_by_state().pending, 2);
        assert_eq!(a.await.unwrap().value(), Some(1));
        assert_eq!(b.await.unwrap().value(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_failure_cancels_without_running() {
        let queue = auto();
        let ran = Arc::new(AtomicBool::new(false));

        let a = queue.add(TaskOptions::new("add", fail_after(10)));
        let flag = Arc::clone(&ran);
        let b = queue.add(
            TaskOptions::new("update", move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(5)
            })
            .depends_on(["add"]),
        );
        let b_id = b.id();

        assert!(matches!(a.await, Err(TaskError::Failed(_))));
        let err = b.await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(queue.state_of(b_id), Some(TaskState::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_only_relation_still_runs_after_failure() {
        let queue = auto();

        let a = queue.add(TaskOptions::new("update", fail_after(10)));
        let b = queue.add(TaskOptions::new("update", after(10, 7)).waits_for(["update"]));

        assert!(a.await.is_err());
        assert_eq!(b.await.unwrap().value(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn replaceable_waiting_tail_is_superseded() {
        let queue = auto();
        let ran = Arc::new(AtomicBool::new(false));

        let x = queue.add(TaskOptions::new("sync", after(100, 1)));
        let flag = Arc::clone(&ran);
        let a = queue.add(
            TaskOptions::new("update", move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(2)
            })
            .waits_for(["sync"])
            .can_replace(true),
        );
        let b = queue.add(TaskOptions::new("update", after(10, 3)).waits_for(["sync"]));
        let b_id = b.id();

        assert!(a.await.unwrap().is_superseded());
        assert_eq!(queue.state_of(b_id), Some(TaskState::Blocked));
        assert_eq!(x.await.unwrap().value(), Some(1));
        assert_eq!(b.await.unwrap().value(), Some(3));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn early_result_stays_partial_until_the_slow_ancestor_settles() {
        let queue = auto();
        let finals = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&finals);
        let a = queue.add(
            TaskOptions::new("a", after(100, 1))
                .on_complete(move |v, ctx| log.lock().unwrap().push((*v, ctx.is_final))),
        );
        let log = Arc::clone(&finals);
        let b = queue.add(
            TaskOptions::new("b", after(10, 2))
                .on_complete(move |v, ctx| log.lock().unwrap().push((*v, ctx.is_final))),
        );
        let b_id = b.id();

        assert_eq!(b.await.unwrap().value(), Some(2));
        assert_eq!(queue.state_of(b_id), Some(TaskState::PartialComplete));

        assert_eq!(a.await.unwrap().value(), Some(1));
        assert_eq!(queue.state_of(b_id), Some(TaskState::Complete));
        assert_eq!(*finals.lock().unwrap(), vec![(2, false), (1, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_reports_last_settled_value() {
        let queue = auto();
        let seen = Arc::new(Mutex::new(None));

        let a = queue.add(TaskOptions::new("add", after(10, 1)));
        let b = queue.add(TaskOptions::new("add", fail_after(20)));
        let sink = Arc::clone(&seen);
        let c = queue.add(
            TaskOptions::new("update", after(10, 9))
                .depends_on(["add"])
                .on_error(move |err, ctx| {
                    *sink.lock().unwrap() =
                        Some((err.is_cancelled(), ctx.is_final, ctx.last_value));
                }),
        );

        assert!(a.await.is_ok());
        assert!(b.await.is_err());
        assert!(c.await.is_err());
        assert_eq!(*seen.lock().unwrap(), Some((true, true, Some(1))));
        assert_eq!(queue.last_settled_value(), Some(1));
    }

    #[tokio::test]
    async fn draining_an_empty_queue_is_a_noop() {
        let queue = auto();

        queue.drain();
        queue.drain();
        queue.run().await;

        assert!(!queue.is_busy());
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(queue.counts_by_state(), QueueCounts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_edges_are_emitted_once_per_period() {
        let queue = auto();
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&events);
        queue.add_listener(Arc::new(move |event: &QueueEvent| {
            log.lock().unwrap().push(event.is_busy());
        }));

        let a = queue.add(TaskOptions::new("a", after(10, 1)));
        let b = queue.add(TaskOptions::new("b", after(20, 2)));
        assert!(queue.is_busy());
        assert_eq!(queue.outstanding(), 2);

        a.await.unwrap();
        b.await.unwrap();
        queue.wait_idle().await;

        assert!(!queue.is_busy());
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_starts_nothing_until_run() {
        let queue: Queue<i64> = Queue::new(QueueConfig {
            run_mode: RunMode::Manual,
            ..QueueConfig::default()
        });

        let a = queue.add(TaskOptions::new("a", after(10, 1)));
        let a_id = a.id();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.state_of(a_id), Some(TaskState::None));
        assert!(queue.is_busy());

        queue.run().await;

        assert_eq!(a.await.unwrap().value(), Some(1));
        assert!(!queue.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_history_is_released() {
        let queue = auto();

        for n in 0..5 {
            queue
                .add(TaskOptions::new("a", after(10, n)))
                .await
                .unwrap();
        }

        assert_eq!(queue.counts_by_state().total(), 1);
        assert_eq!(queue.last_settled_value(), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_value_is_readable_before_promotion() {
        let queue = auto();

        let a = queue.add(TaskOptions::new("a", after(100, 1)));
        let b = queue.add(TaskOptions::new("b", after(10, 2)));
        let (a_id, b_id) = (a.id(), b.id());
        b.await.unwrap();

        assert_eq!(queue.value_of(b_id), Some(2));
        assert_eq!(queue.value_of(a_id), None);
        a.await.unwrap();
        assert_eq!(queue.state_of(b_id), Some(TaskState::Complete));
        assert_eq!(queue.value_of(b_id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_still_resolves_the_handle() {
        let queue = auto();

        let a = queue.add(
            TaskOptions::new("a", after(10, 1)).on_complete(|_, _| panic!("callback failure")),
        );
        let b = queue.add(
            TaskOptions::new("b", fail_after(20)).on_error(|_, _| panic!("callback failure")),
        );

        assert_eq!(a.await.unwrap().value(), Some(1));
        assert!(matches!(b.await, Err(TaskError::Failed(_))));
        queue.wait_idle().await;
        assert!(!queue.is_busy());
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn listeners_see_edges_in_order_across_workers() {
        for _ in 0..200 {
            let queue: Queue<i64> = auto();
            let events = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&events);
            queue.add_listener(Arc::new(move |event: &QueueEvent| {
                log.lock().unwrap().push(event.is_busy());
            }));

            queue
                .add(TaskOptions::new("a", || async { Ok::<_, BoxError>(1) }))
                .await
                .unwrap();
            queue.wait_idle().await;

            let delivered = tokio::time::timeout(Duration::from_secs(1), async {
                while events.lock().unwrap().len() < 2 {
                    tokio::task::yield_now().await;
                }
            })
            .await;
            assert!(delivered.is_ok());
            assert_eq!(*events.lock().unwrap(), vec![true, false]);
        }
    }
}
