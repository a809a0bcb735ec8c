//! Queue group: one queue per key, one aggregate busy signal.
//!
//! # 設計
//! - キーごとのキューは最初の `add` で作る。名前の関係（依存・待ち・置き換え）は
//!   キーをまたがない。
//! - 各キューに `KeyedSink` を登録し、busy なキーの集合を `BusyTracker` で持つ。
//!   集合が空 <-> 非空になったときだけグループのエッジを出す。
//! - キューのエッジは発生順に届くので、集合が古いイベントで壊れることはない。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::domain::{QueueEvent, QueueId, TaskOptions};
use crate::ports::{Emitter, EventSink, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::{Queue, Submission};

/// Tracks which keyed queues are busy and re-emits the aggregate edges.
struct BusyTracker {
    group: QueueId,
    busy_keys: Mutex<HashSet<String>>,
    events: Emitter,
    busy: watch::Sender<bool>,
}

impl BusyTracker {
    fn record(&self, key: &str, busy: bool) {
        {
            let mut keys = self.busy_keys.lock().unwrap_or_else(PoisonError::into_inner);
            let was_busy = !keys.is_empty();
            if busy {
                keys.insert(key.to_string());
            } else {
                keys.remove(key);
            }
            let now_busy = !keys.is_empty();
            if was_busy != now_busy {
                self.busy.send_replace(now_busy);
                info!(group = %self.group, busy = now_busy, "group busy state changed");
                self.events.enqueue(if now_busy {
                    QueueEvent::StartProcess { queue: self.group }
                } else {
                    QueueEvent::EndProcess { queue: self.group }
                });
            }
        }
        self.events.flush();
    }
}

/// Listener registered on each sub-queue.
struct KeyedSink {
    key: String,
    tracker: Arc<BusyTracker>,
}

impl EventSink for KeyedSink {
    fn emit(&self, event: &QueueEvent) {
        debug!(
            key = %self.key,
            queue = %event.queue(),
            busy = event.is_busy(),
            "keyed queue edge"
        );
        self.tracker.record(&self.key, event.is_busy());
    }
}

/// Routes submissions to independent per-key queues.
///
/// Queues are created on first use from the group's config template, labelled
/// with their key. Relationships (names, supersession, cancellation) never
/// cross keys. The group is busy iff at least one keyed queue is busy.
pub struct QueueGroup<V> {
    config: QueueConfig,
    ids: Arc<dyn IdGenerator>,
    queues: Mutex<BTreeMap<String, Queue<V>>>,
    tracker: Arc<BusyTracker>,
}

impl<V: Clone + Send + 'static> QueueGroup<V> {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_id_generator(config, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(config: QueueConfig, ids: Arc<dyn IdGenerator>) -> Self {
        let (busy, _) = watch::channel(false);
        let tracker = Arc::new(BusyTracker {
            group: ids.generate_queue_id(),
            busy_keys: Mutex::new(HashSet::new()),
            events: Emitter::new(),
            busy,
        });
        Self {
            config,
            ids,
            queues: Mutex::new(BTreeMap::new()),
            tracker,
        }
    }

    pub fn id(&self) -> QueueId {
        self.tracker.group
    }

    /// The queue for `key`, created if absent.
    pub fn queue(&self, key: &str) -> Queue<V> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queues.get(key) {
            return queue.clone();
        }

        let config = self.config.clone().with_label(key);
        let queue = Queue::with_id_generator(config, Arc::clone(&self.ids));
        queue.add_listener(Arc::new(KeyedSink {
            key: key.to_string(),
            tracker: Arc::clone(&self.tracker),
        }));
        debug!(group = %self.tracker.group, key, queue = %queue.id(), "queue created");
        queues.insert(key.to_string(), queue.clone());
        queue
    }

    pub fn add(&self, key: &str, options: TaskOptions<V>) -> Submission<V> {
        // Group lock is released before the submission drains.
        self.queue(key).add(options)
    }

    /// Drain every keyed queue, then wait until the whole group is idle.
    pub async fn run(&self) {
        for queue in self.queues_snapshot() {
            queue.drain();
        }
        self.wait_idle().await;
    }

    pub async fn wait_idle(&self) {
        let mut busy = self.tracker.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub fn is_busy(&self) -> bool {
        *self.tracker.busy.borrow()
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.tracker.busy.subscribe()
    }

    pub fn add_listener(&self, sink: Arc<dyn EventSink>) {
        self.tracker.events.add_sink(sink);
    }

    /// Keys with a queue, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn queues_snapshot(&self) -> Vec<Queue<V>> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use crate::error::BoxError;
    use std::time::Duration;

    fn after(ms: u64, value: i64) -> TaskOptions<i64> {
        TaskOptions::new("update", move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, BoxError>(value)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent_queues() {
        let group = QueueGroup::new(QueueConfig::default());

        let a = group.add("user-1", after(100, 1).depends_on(["update"]));
        let b = group.add("user-2", after(10, 2).depends_on(["update"]));
        let b_id = b.id();

        assert_eq!(group.queue("user-2").state_of(b_id), Some(TaskState::Pending));
        assert_eq!(b.await.unwrap().value(), Some(2));
        assert_eq!(a.await.unwrap().value(), Some(1));
        assert_eq!(group.keys(), vec!["user-1".to_string(), "user-2".to_string()]);
        assert_eq!(group.queue("user-1").config().label, "user-1");
    }

    #[tokio::test(start_paused = true)]
    async fn aggregate_busy_edges_fire_once() {
        let group = QueueGroup::new(QueueConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&events);
        group.add_listener(Arc::new(move |event: &QueueEvent| {
            log.lock().unwrap().push(event.is_busy());
        }));

        let a = group.add("a", after(10, 1));
        let b = group.add("b", after(30, 2));
        assert!(group.is_busy());

        a.await.unwrap();
        assert!(group.is_busy());
        b.await.unwrap();
        group.wait_idle().await;

        assert!(!group.is_busy());
        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_group_runs_every_queue() {
        let group = QueueGroup::new(QueueConfig::manual());

        let a = group.add("a", after(10, 1));
        let b = group.add("b", after(20, 2));
        let a_id = a.id();
        assert_eq!(group.queue("a").state_of(a_id), Some(TaskState::None));

        group.run().await;

        assert_eq!(a.await.unwrap().value(), Some(1));
        assert_eq!(b.await.unwrap().value(), Some(2));
        assert!(!group.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn group_goes_idle_on_a_multi_threaded_runtime() {
        for _ in 0..200 {
            let group: QueueGroup<i64> = QueueGroup::new(QueueConfig::default());

            group
                .add("k", TaskOptions::new("a", || async { Ok::<_, BoxError>(1) }))
                .await
                .unwrap();
            group.queue("k").wait_idle().await;

            let idle = tokio::time::timeout(Duration::from_secs(1), group.wait_idle()).await;
            assert!(idle.is_ok());
            assert!(!group.is_busy());
        }
    }
}
