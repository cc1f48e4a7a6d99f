//! Background worker threads.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::debug;

use crate::{constants::WORKER_POLL_INTERVAL, queue::WorkQueue, store::StoreInner};

/// Spawn a thread that feeds items from one store queue to `handle` until
/// the store stops or is dropped.
///
/// The thread holds only a weak handle between items, so dropping the last
/// [`BlockStore`](crate::BlockStore) ends it.
pub(crate) fn spawn<T: Send + 'static>(
    name: &'static str,
    inner: &Arc<StoreInner>,
    queue: fn(&StoreInner) -> &WorkQueue<T>,
    handle: fn(&StoreInner, T),
) -> io::Result<JoinHandle<()>> {
    let weak = Arc::downgrade(inner);
    thread::Builder::new().name(name.to_owned()).spawn(move || {
        if let Some(inner) = weak.upgrade() {
            queue(&inner).bind_consumer();
        }
        loop {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.stopping() {
                break;
            }
            let Some(item) = queue(&inner).next(WORKER_POLL_INTERVAL) else {
                continue;
            };
            handle(&inner, item);
            queue(&inner).done();
        }
        debug!(worker = name, "Worker stopped");
    })
}
