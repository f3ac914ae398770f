//! FIFO run queue of Ready Tasks

use crate::scheduler::task::{Task, TaskId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Global run queue shared by every carrier
///
/// A plain locked deque rather than a work-stealing injector: cancellation
/// needs removal by id, and dispatch always takes the head.
pub(crate) struct RunQueue {
    queue: Mutex<VecDeque<Arc<Task>>>,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, task: Arc<Task>) {
        self.queue.lock().push_back(task);
    }

    /// Push only while fewer than `limit` Tasks are queued
    pub(crate) fn push_bounded(&self, task: Arc<Task>, limit: Option<usize>) -> Result<(), Arc<Task>> {
        let mut queue = self.queue.lock();
        if let Some(limit) = limit {
            if queue.len() >= limit {
                return Err(task);
            }
        }
        queue.push_back(task);
        Ok(())
    }

    /// Put a Task back at the head (dispatch could not hand it off)
    pub(crate) fn push_front(&self, task: Arc<Task>) {
        self.queue.lock().push_front(task);
    }

    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn remove(&self, id: TaskId) -> Option<Arc<Task>> {
        let mut queue = self.queue.lock();
        let index = queue.iter().position(|task| task.id() == id)?;
        queue.remove(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Empty the queue, returning what it held
    pub(crate) fn drain(&self) -> Vec<Arc<Task>> {
        self.queue.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Arc<Task> {
        Arc::new(Task::new(None, Box::pin(async { Ok(()) })))
    }

    #[test]
    fn test_fifo_order() {
        let queue = RunQueue::new();
        let (a, b, c) = (task(), task(), task());
        queue.push(a.clone());
        queue.push(b.clone());
        queue.push(c.clone());

        assert_eq!(queue.pop().unwrap().id(), a.id());
        assert_eq!(queue.pop().unwrap().id(), b.id());
        assert_eq!(queue.pop().unwrap().id(), c.id());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_bounded_rejects_at_limit() {
        let queue = RunQueue::new();
        assert!(queue.push_bounded(task(), Some(2)).is_ok());
        assert!(queue.push_bounded(task(), Some(2)).is_ok());
        let rejected = task();
        let returned = queue.push_bounded(rejected.clone(), Some(2)).unwrap_err();
        assert_eq!(returned.id(), rejected.id());
        assert_eq!(queue.len(), 2);

        assert!(queue.push_bounded(task(), None).is_ok());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_remove_by_id() {
        let queue = RunQueue::new();
        let (a, b) = (task(), task());
        queue.push(a.clone());
        queue.push(b.clone());

        assert_eq!(queue.remove(a.id()).unwrap().id(), a.id());
        assert!(queue.remove(a.id()).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().id(), b.id());
    }

    #[test]
    fn test_push_front_and_drain() {
        let queue = RunQueue::new();
        let (a, b) = (task(), task());
        queue.push(a.clone());
        queue.push_front(b.clone());

        let drained = queue.drain();
        assert_eq!(drained[0].id(), b.id());
        assert_eq!(drained[1].id(), a.id());
        assert!(queue.is_empty());
    }
}
