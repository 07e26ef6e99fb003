//! Deferred execution with batch cancellation.
//!
//! Tasks are queued with a due time and fire in (due, insertion) order when
//! popped. Every task belongs to a batch; cancelling a batch drops all of its
//! pending tasks in one step, so a superseded schedule can never fire.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct Entry<A> {
    due: Duration,
    id: TaskId,
    batch: BatchId,
    action: A,
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl<A> Eq for Entry<A> {}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Entry<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Task ids grow monotonically, so they break ties in insertion order
        self.due.cmp(&other.due).then(self.id.0.cmp(&other.id.0))
    }
}

pub struct Timeline<A> {
    queue: BinaryHeap<Reverse<Entry<A>>>,
    next_task: u64,
    next_batch: u64,
}

impl<A> Default for Timeline<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Timeline<A> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            next_task: 0,
            next_batch: 0,
        }
    }

    pub fn begin_batch(&mut self) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        id
    }

    pub fn schedule(&mut self, batch: BatchId, due: Duration, action: A) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.queue.push(Reverse(Entry { due, id, batch, action }));
        id
    }

    /// Returns false when the task already fired or was cancelled.
    pub fn cancel(&mut self, task: TaskId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|Reverse(e)| e.id != task);
        self.queue.len() != before
    }

    /// Drop every pending task of `batch`. Returns how many were dropped.
    pub fn cancel_batch(&mut self, batch: BatchId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|Reverse(e)| e.batch != batch);
        before - self.queue.len()
    }

    /// Next task due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TaskId, A)> {
        if self.queue.peek()?.0.due > now {
            return None;
        }
        self.queue.pop().map(|Reverse(e)| (e.id, e.action))
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.queue.peek().map(|Reverse(e)| e.due)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending_in(&self, batch: BatchId) -> usize {
        self.queue.iter().filter(|Reverse(e)| e.batch == batch).count()
    }

    /// Pending tasks in firing order.
    pub fn pending(&self) -> Vec<(Duration, &A)> {
        let mut entries: Vec<&Entry<A>> = self.queue.iter().map(|Reverse(e)| e).collect();
        entries.sort();
        entries.into_iter().map(|e| (e.due, &e.action)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn fires_in_due_then_insertion_order() {
        let mut t = Timeline::new();
        let b = t.begin_batch();
        t.schedule(b, ms(20), "late");
        t.schedule(b, ms(10), "first");
        t.schedule(b, ms(10), "second");

        assert!(t.pop_due(ms(5)).is_none());
        let fired: Vec<_> = std::iter::from_fn(|| t.pop_due(ms(30)).map(|(_, a)| a)).collect();
        assert_eq!(fired, vec!["first", "second", "late"]);
    }

    #[test]
    fn cancel_batch_is_total() {
        let mut t = Timeline::new();
        let old = t.begin_batch();
        let new = t.begin_batch();
        for i in 0..10 {
            t.schedule(old, ms(i * 10), i);
        }
        t.schedule(new, ms(5), 100);

        assert_eq!(t.cancel_batch(old), 10);
        assert_eq!(t.pending_in(old), 0);
        assert_eq!(t.len(), 1);
        assert_eq!(t.pop_due(ms(1000)).map(|(_, a)| a), Some(100));
        assert!(t.is_empty());
    }

    #[test]
    fn single_task_cancel() {
        let mut t = Timeline::new();
        let b = t.begin_batch();
        let keep = t.schedule(b, ms(1), 'a');
        let dropped = t.schedule(b, ms(2), 'b');
        assert!(t.cancel(dropped));
        assert!(!t.cancel(dropped));
        assert_eq!(t.pop_due(ms(10)), Some((keep, 'a')));
        assert!(t.pop_due(ms(10)).is_none());
    }

    #[test]
    fn pending_lists_in_firing_order() {
        let mut t = Timeline::new();
        let b = t.begin_batch();
        t.schedule(b, ms(30), 3);
        t.schedule(b, ms(10), 1);
        t.schedule(b, ms(20), 2);
        assert_eq!(t.next_due(), Some(ms(10)));
        let order: Vec<i32> = t.pending().into_iter().map(|(_, a)| *a).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
