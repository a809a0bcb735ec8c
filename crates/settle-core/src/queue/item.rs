//! Task item: one submitted action plus its scheduling state.
//!
//! 状態遷移は `transition` だけを通す。不正な遷移は debug ビルドで panic、
//! release ビルドでは warn ログを出してそのまま進める。

use std::fmt;

use tracing::warn;

use crate::domain::{TaskId, TaskState};
use crate::ports::Action;

/// Identity, relationship declarations, state and chain links of one submission.
///
/// Design:
/// - `prev`/`next` are ids into the owning `Chain`, never references, so the
///   chain owns every item exclusively and needs no reference counting.
/// - All state transitions happen here.
pub struct TaskItem<V> {
    id: TaskId,
    name: String,
    depends_on: Vec<String>,
    waits_for: Vec<String>,
    can_replace: bool,

    /// Taken when the item starts running.
    action: Option<Box<dyn Action<V>>>,

    pub(crate) value: Option<V>,
    state: TaskState,

    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
}

impl<V> TaskItem<V> {
    /// `waits_for` defaults to `depends_on` when not supplied.
    pub fn new(
        id: TaskId,
        name: String,
        action: Box<dyn Action<V>>,
        depends_on: Vec<String>,
        waits_for: Option<Vec<String>>,
        can_replace: bool,
    ) -> Self {
        let waits_for = waits_for.unwrap_or_else(|| depends_on.clone());
        Self {
            id,
            name,
            depends_on,
            waits_for,
            can_replace,
            action: Some(action),
            value: None,
            state: TaskState::None,
            prev: None,
            next: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn can_replace(&self) -> bool {
        self.can_replace
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn prev(&self) -> Option<TaskId> {
        self.prev
    }

    pub fn next(&self) -> Option<TaskId> {
        self.next
    }

    /// A failure of an item with this name cancels this one.
    pub fn has_dependency_on(&self, name: &str) -> bool {
        self.depends_on.iter().any(|n| n == name)
    }

    /// This item must not start while an item with this name is unsettled.
    /// A dependency always implies waiting.
    pub fn has_wait_relation_to(&self, name: &str) -> bool {
        self.waits_for.iter().any(|n| n == name) || self.has_dependency_on(name)
    }

    /// Mark Pending and hand out the action. `None` if it was already taken.
    pub fn start_running(&mut self) -> Option<Box<dyn Action<V>>> {
        self.transition(TaskState::Pending);
        self.action.take()
    }

    pub fn mark_blocked(&mut self) {
        self.transition(TaskState::Blocked);
    }

    pub fn mark_complete(&mut self) {
        self.transition(TaskState::Complete);
    }

    pub fn mark_partial_complete(&mut self) {
        self.transition(TaskState::PartialComplete);
    }

    pub fn mark_error(&mut self) {
        self.transition(TaskState::Error);
    }

    pub fn mark_cancelled(&mut self) {
        self.transition(TaskState::Cancelled);
        self.action = None;
    }

    pub fn is_waiting(&self) -> bool {
        self.state.is_any(TaskState::WAITING)
    }

    pub fn is_blocked(&self) -> bool {
        self.state == TaskState::Blocked
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn is_complete(&self) -> bool {
        self.state == TaskState::Complete
    }

    pub fn is_partial_complete(&self) -> bool {
        self.state == TaskState::PartialComplete
    }

    pub fn is_error(&self) -> bool {
        self.state == TaskState::Error
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == TaskState::Cancelled
    }

    fn transition(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "{:?} -> {:?}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            warn!(
                task = %self.id,
                from = ?self.state,
                to = ?next,
                "unexpected task state transition"
            );
        }
        self.state = next;
    }
}

impl<V> fmt::Debug for TaskItem<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BoxError;
    use ulid::Ulid;

    pub(crate) fn item(seq: u64, name: &str) -> TaskItem<i64> {
        item_with(seq, name, &[], None, false)
    }

    pub(crate) fn item_with(
        seq: u64,
        name: &str,
        depends_on: &[&str],
        waits_for: Option<&[&str]>,
        can_replace: bool,
    ) -> TaskItem<i64> {
        TaskItem::new(
            TaskId::from_ulid(Ulid::from_parts(seq, 0)),
            name.to_string(),
            Box::new(|| async { Ok::<i64, BoxError>(0) }),
            depends_on.iter().map(|s| s.to_string()).collect(),
            waits_for.map(|w| w.iter().map(|s| s.to_string()).collect()),
            can_replace,
        )
    }

    #[test]
    fn waits_for_defaults_to_depends_on() {
        let item = item_with(1, "update", &["add"], None, false);
        assert!(item.has_dependency_on("add"));
        assert!(item.has_wait_relation_to("add"));
        assert!(!item.has_wait_relation_to("update"));
    }

    #[test]
    fn explicit_waits_for_does_not_imply_dependency() {
        let item = item_with(1, "add", &[], Some(&["update"]), false);
        assert!(item.has_wait_relation_to("update"));
        assert!(!item.has_dependency_on("update"));
    }

    #[test]
    fn dependency_is_waited_for_even_with_explicit_waits() {
        let item = item_with(1, "update", &["add"], Some(&["update"]), true);
        assert!(item.has_wait_relation_to("add"));
        assert!(item.has_wait_relation_to("update"));
    }

    #[test]
    fn start_running_hands_out_the_action_once() {
        let mut item = item(1, "add");
        assert!(item.start_running().is_some());
        assert!(item.is_pending());
        assert!(item.action.is_none());
    }

    #[test]
    fn partial_complete_promotes_to_complete() {
        let mut item = item(1, "add");
        item.start_running();
        item.mark_partial_complete();
        assert!(item.is_partial_complete());
        item.mark_complete();
        assert!(item.is_complete());
    }

    #[test]
    fn cancelled_item_drops_its_action() {
        let mut item = item(1, "update");
        item.mark_blocked();
        item.mark_cancelled();
        assert!(item.is_cancelled());
        assert!(item.action.is_none());
    }
}
