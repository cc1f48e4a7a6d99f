//! Bounded work queue shared by the background workers.

use std::{
    collections::VecDeque,
    sync::OnceLock,
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Bounded FIFO with a pending-work counter.
///
/// Producers block when the channel is full. The consumer thread itself must
/// never block on its own queue, so its submissions spill into an unbounded
/// backlog that is served first.
pub(crate) struct WorkQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    backlog: Mutex<VecDeque<T>>,
    consumer: OnceLock<ThreadId>,
    pending: Mutex<usize>,
    idle: Condvar,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            name,
            tx,
            rx,
            backlog: Mutex::new(VecDeque::new()),
            consumer: OnceLock::new(),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Register the calling thread as the only consumer.
    pub(crate) fn bind_consumer(&self) {
        let _ = self.consumer.set(thread::current().id());
    }

    /// Enqueue an item, blocking while the queue is full unless called from
    /// the consumer thread.
    pub(crate) fn submit(&self, item: T) {
        *self.pending.lock() += 1;

        let from_consumer = self.consumer.get() == Some(&thread::current().id());
        let result = if from_consumer {
            match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(item)) => {
                    debug!(queue = self.name, "queue full, deferring to backlog");
                    self.backlog.lock().push_back(item);
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(()),
            }
        } else {
            self.tx.send(item).map_err(|_| ())
        };

        if result.is_err() {
            self.done();
        }
    }

    /// Next item, waiting up to `timeout`.
    pub(crate) fn next(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.backlog.lock().pop_front() {
            return Some(item);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Mark one previously taken item as finished.
    pub(crate) fn done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Items submitted but not yet finished.
    pub(crate) fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Wait until every submitted item is finished. Returns `false` on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_and_idle() {
        let queue = WorkQueue::new("test", 4);
        queue.submit(1);
        queue.submit(2);
        assert_eq!(queue.pending(), 2);
        assert!(!queue.wait_idle(Duration::from_millis(10)));

        assert_eq!(queue.next(Duration::from_millis(10)), Some(1));
        queue.done();
        assert_eq!(queue.next(Duration::from_millis(10)), Some(2));
        queue.done();
        assert!(queue.wait_idle(Duration::from_millis(10)));
        assert_eq!(queue.next(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_consumer_spills_to_backlog() {
        let queue = WorkQueue::new("test", 1);
        queue.bind_consumer();
        // Would block forever on a bounded channel of one without the backlog.
        queue.submit(1);
        queue.submit(2);
        queue.submit(3);
        assert_eq!(queue.pending(), 3);

        let mut seen = Vec::new();
        while let Some(item) = queue.next(Duration::from_millis(10)) {
            seen.push(item);
            queue.done();
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_wait_idle_wakes() {
        let queue = Arc::new(WorkQueue::new("test", 4));
        queue.submit(7u32);

        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let item = queue.next(Duration::from_secs(1));
                thread::sleep(Duration::from_millis(20));
                queue.done();
                item
            })
        };

        assert!(queue.wait_idle(Duration::from_secs(5)));
        assert_eq!(worker.join().ok().flatten(), Some(7));
    }
}
