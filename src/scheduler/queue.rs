use std::collections::VecDeque;
use std::sync::Mutex;

/// A multi-producer queue with internal locking.
///
/// Both scheduler queues (commands in, ready callbacks out) use this. The
/// consumer side is the main loop for the in-queue and the worker pool for
/// the out-queue; contention is low and a mutex around a `VecDeque` beats
/// anything fancier at this scale.
#[derive(Debug)]
pub(crate) struct ConcurrentQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ConcurrentQueue<T> {
    pub(crate) fn new() -> ConcurrentQueue<T> {
        ConcurrentQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, item: T) {
        self.inner.lock().expect("queue lock poisoned").push_back(item);
    }

    pub(crate) fn push_batch(&self, items: impl IntoIterator<Item = T>) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.extend(items);
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.lock().expect("queue lock poisoned").pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = ConcurrentQueue::new();
        queue.push(1);
        queue.push_batch([2, 3]);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }
}
