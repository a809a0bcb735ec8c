//! Submission-order chain of task items.
//!
//! Design:
//! - Items live in a table keyed by `TaskId`; `prev`/`next` are ids into it.
//! - Every item points to the item submitted immediately before/after it,
//!   regardless of name.
//! - Invariant: links are kept in sync. If `a.next == Some(b)` then
//!   `b.prev == Some(a)`. Items are only appended at the tail, replaced in
//!   place, or removed from the head.

use std::collections::HashMap;

use super::item::TaskItem;
use crate::domain::{TaskId, TaskState};

pub struct Chain<V> {
    items: HashMap<TaskId, TaskItem<V>>,

    /// Oldest retained item.
    head: Option<TaskId>,

    /// Most recently appended item.
    tail: Option<TaskId>,
}

impl<V> Chain<V> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskItem<V>> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskItem<V>> {
        self.items.get_mut(&id)
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub fn tail(&self) -> Option<TaskId> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskItem<V>> {
        self.items.values()
    }

    /// Link `item` after the current tail and make it the tail.
    pub fn append(&mut self, mut item: TaskItem<V>) {
        let id = item.id();
        item.prev = self.tail;
        item.next = None;
        match self.tail.and_then(|tail| self.items.get_mut(&tail)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.items.insert(id, item);
    }

    /// Put `item` in the place of `old`, inheriting its links.
    ///
    /// Returns the removed item, or gives `item` back if `old` is unknown.
    pub fn replace(
        &mut self,
        old: TaskId,
        mut item: TaskItem<V>,
    ) -> Result<TaskItem<V>, TaskItem<V>> {
        let Some(removed) = self.items.remove(&old) else {
            return Err(item);
        };
        let id = item.id();
        item.prev = removed.prev;
        item.next = removed.next;

        match removed.prev.and_then(|p| self.items.get_mut(&p)) {
            Some(prev) => prev.next = Some(id),
            None => self.head = Some(id),
        }
        match removed.next.and_then(|n| self.items.get_mut(&n)) {
            Some(next) => next.prev = Some(id),
            None => self.tail = Some(id),
        }
        self.items.insert(id, item);
        Ok(removed)
    }

    /// Remove the oldest item and detach its successor.
    pub fn pop_head(&mut self) -> Option<TaskItem<V>> {
        let head = self.head?;
        let removed = self.items.remove(&head)?;
        self.head = removed.next;
        match removed.next.and_then(|n| self.items.get_mut(&n)) {
            Some(next) => next.prev = None,
            None => self.tail = None,
        }
        Some(removed)
    }

    /// Nearest item, starting at `from` and walking `prev` links, whose state is
    /// not in `states`.
    pub fn find_item_by_state(
        &self,
        from: Option<TaskId>,
        states: &[TaskState],
    ) -> Option<&TaskItem<V>> {
        let mut cursor = from;
        while let Some(item) = cursor.and_then(|id| self.items.get(&id)) {
            if !item.state().is_any(states) {
                return Some(item);
            }
            cursor = item.prev();
        }
        None
    }

    /// Whether a Pending item is found walking back from `from` through
    /// Error/Cancelled/PartialComplete items.
    pub fn find_pending(&self, from: Option<TaskId>) -> bool {
        let mut cursor = from;
        while let Some(item) = cursor.and_then(|id| self.items.get(&id)) {
            if item.is_pending() {
                return true;
            }
            if !item.state().is_any(TaskState::PASSABLE) {
                return false;
            }
            cursor = item.prev();
        }
        false
    }

    /// Whether `target` is reachable walking `next` links, starting at `from`.
    pub fn reaches(&self, from: Option<TaskId>, target: TaskId) -> bool {
        let mut cursor = from;
        while let Some(item) = cursor.and_then(|id| self.items.get(&id)) {
            if item.id() == target {
                return true;
            }
            cursor = item.next();
        }
        false
    }

    /// Cascading promotion after `from` settled.
    ///
    /// Walks forward: PartialComplete successors become Complete and the walk
    /// continues from them; Error and Cancelled successors are skipped over;
    /// anything else stops the walk. Returns the promoted ids in chain order.
    pub fn promote_from(&mut self, from: TaskId) -> Vec<TaskId> {
        let mut promoted = Vec::new();
        let mut cursor = self.items.get(&from).and_then(|item| item.next());
        while let Some(item) = cursor.and_then(|id| self.items.get_mut(&id)) {
            if item.is_partial_complete() {
                item.mark_complete();
                promoted.push(item.id());
            } else if !(item.is_error() || item.is_cancelled()) {
                break;
            }
            cursor = item.next();
        }
        promoted
    }
}

impl<V> Default for Chain<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::tests::{item, item_with};

    fn chain_of(names: &[&str]) -> (Chain<i64>, Vec<TaskId>) {
        let mut chain = Chain::new();
        let mut ids = Vec::new();
        for (seq, name) in names.iter().enumerate() {
            let item = item(seq as u64 + 1, name);
            ids.push(item.id());
            chain.append(item);
        }
        (chain, ids)
    }

    fn set_state(chain: &mut Chain<i64>, id: TaskId, state: TaskState) {
        let item = chain.get_mut(id).unwrap();
        match state {
            TaskState::Blocked => item.mark_blocked(),
            TaskState::Pending => {
                item.start_running();
            }
            TaskState::Complete => {
                item.start_running();
                item.mark_complete();
            }
            TaskState::PartialComplete => {
                item.start_running();
                item.mark_partial_complete();
            }
            TaskState::Error => {
                item.start_running();
                item.mark_error();
            }
            TaskState::Cancelled => item.mark_cancelled(),
            TaskState::None => {}
        }
    }

    #[test]
    fn append_links_both_directions() {
        let (chain, ids) = chain_of(&["a", "b", "c"]);

        assert_eq!(chain.head(), Some(ids[0]));
        assert_eq!(chain.tail(), Some(ids[2]));
        assert_eq!(chain.get(ids[1]).unwrap().prev(), Some(ids[0]));
        assert_eq!(chain.get(ids[1]).unwrap().next(), Some(ids[2]));
        assert_eq!(chain.get(ids[0]).unwrap().prev(), None);
        assert_eq!(chain.get(ids[2]).unwrap().next(), None);
    }

    #[test]
    fn replace_tail_inherits_prev() {
        let (mut chain, ids) = chain_of(&["add", "update"]);
        let newer = item_with(10, "update", &[], None, true);
        let newer_id = newer.id();

        let removed = chain.replace(ids[1], newer).unwrap();

        assert_eq!(removed.id(), ids[1]);
        assert_eq!(chain.tail(), Some(newer_id));
        assert_eq!(chain.get(newer_id).unwrap().prev(), Some(ids[0]));
        assert_eq!(chain.get(ids[0]).unwrap().next(), Some(newer_id));
        assert!(chain.get(ids[1]).is_none());
    }

    #[test]
    fn replace_unknown_gives_item_back() {
        let (mut chain, _) = chain_of(&["a"]);
        let stranger = item(99, "b");
        let stranger_id = stranger.id();
        let back = chain.replace(item(98, "x").id(), stranger).unwrap_err();
        assert_eq!(back.id(), stranger_id);
    }

    #[test]
    fn pop_head_detaches_successor() {
        let (mut chain, ids) = chain_of(&["a", "b"]);

        let popped = chain.pop_head().unwrap();

        assert_eq!(popped.id(), ids[0]);
        assert_eq!(chain.head(), Some(ids[1]));
        assert_eq!(chain.get(ids[1]).unwrap().prev(), None);
        chain.pop_head();
        assert!(chain.is_empty());
        assert_eq!(chain.tail(), None);
    }

    #[test]
    fn find_item_by_state_skips_listed_states() {
        let (mut chain, ids) = chain_of(&["a", "b", "c"]);
        set_state(&mut chain, ids[0], TaskState::Pending);
        set_state(&mut chain, ids[1], TaskState::Error);
        set_state(&mut chain, ids[2], TaskState::PartialComplete);

        let found = chain
            .find_item_by_state(Some(ids[2]), TaskState::PASSABLE)
            .unwrap();
        assert_eq!(found.id(), ids[0]);
        assert!(chain.find_item_by_state(None, TaskState::PASSABLE).is_none());
    }

    #[test]
    fn find_pending_walks_through_failed_and_partial() {
        let (mut chain, ids) = chain_of(&["a", "b", "c"]);
        set_state(&mut chain, ids[0], TaskState::Pending);
        set_state(&mut chain, ids[1], TaskState::Cancelled);
        set_state(&mut chain, ids[2], TaskState::PartialComplete);

        assert!(chain.find_pending(Some(ids[2])));
    }

    #[test]
    fn find_pending_stops_at_complete() {
        let (mut chain, ids) = chain_of(&["a", "b", "c"]);
        set_state(&mut chain, ids[0], TaskState::Pending);
        set_state(&mut chain, ids[1], TaskState::Complete);
        set_state(&mut chain, ids[2], TaskState::Error);

        assert!(!chain.find_pending(Some(ids[2])));
        assert!(!chain.find_pending(None));
    }

    #[test]
    fn reaches_walks_forward_only() {
        let (chain, ids) = chain_of(&["a", "b", "c"]);
        assert!(chain.reaches(Some(ids[0]), ids[2]));
        assert!(chain.reaches(Some(ids[2]), ids[2]));
        assert!(!chain.reaches(Some(ids[2]), ids[0]));
    }

    #[test]
    fn promotion_skips_errors_and_continues_through_partials() {
        let (mut chain, ids) = chain_of(&["a", "b", "c", "d", "e"]);
        set_state(&mut chain, ids[0], TaskState::Complete);
        set_state(&mut chain, ids[1], TaskState::Error);
        set_state(&mut chain, ids[2], TaskState::PartialComplete);
        set_state(&mut chain, ids[3], TaskState::PartialComplete);
        set_state(&mut chain, ids[4], TaskState::Pending);

        let promoted = chain.promote_from(ids[0]);

        assert_eq!(promoted, vec![ids[2], ids[3]]);
        assert!(chain.get(ids[1]).unwrap().is_error());
        assert!(chain.get(ids[3]).unwrap().is_complete());
        assert!(chain.get(ids[4]).unwrap().is_pending());
    }

    #[test]
    fn promotion_stops_at_blocked_successor() {
        let (mut chain, ids) = chain_of(&["a", "b", "c"]);
        set_state(&mut chain, ids[0], TaskState::Complete);
        set_state(&mut chain, ids[1], TaskState::Blocked);
        set_state(&mut chain, ids[2], TaskState::None);

        assert!(chain.promote_from(ids[0]).is_empty());
    }
}
