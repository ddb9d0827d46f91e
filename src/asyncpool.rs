//! Async offload pool: a fixed-size thread pool for blocking
//! work, draining completions through a lock-free queue onto the event
//! loop's own task so user callbacks never run on a pool thread.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

type Job = Box<dyn FnOnce() -> Box<dyn std::any::Any + Send> + Send>;
type Completion = Box<dyn std::any::Any + Send>;

struct Inner {
    queue: SegQueue<(u64, Job)>,
    ready: SegQueue<(u64, Completion)>,
    notify_work: Notify,
    notify_ready: Notify,
    next_id: AtomicUsize,
    active: AtomicUsize,
}

/// Fixed-size offload pool. `submit` hands a blocking closure to a worker
/// thread; its result is placed on a lock-free ready queue and the event
/// loop is woken via `Notify` to collect it — no raw eventfd, no shared
/// mutable state beyond the queue itself.
#[derive(Clone)]
pub struct AsyncPool {
    inner: Arc<Inner>,
}

impl AsyncPool {
    pub fn new(workers: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: SegQueue::new(),
            ready: SegQueue::new(),
            notify_work: Notify::new(),
            notify_ready: Notify::new(),
            next_id: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        });

        for _ in 0..workers.max(1) {
            let inner = inner.clone();
            std::thread::spawn(move || worker_loop(inner));
        }

        AsyncPool { inner }
    }

    /// Submit blocking work; returns its id so the caller can match the
    /// eventual completion pulled off the ready queue.
    pub fn submit<F>(&self, job: F) -> u64
    where
        F: FnOnce() -> Box<dyn std::any::Any + Send> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) as u64;
        self.inner.active.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.push((id, Box::new(job)));
        self.inner.notify_work.notify_one();
        id
    }

    /// Called only from the event-loop task: drain all currently-ready
    /// completions without blocking.
    pub fn drain_ready(&self) -> Vec<(u64, Completion)> {
        let mut out = Vec::new();
        while let Some(item) = self.inner.ready.pop() {
            out.push(item);
        }
        out
    }

    /// Wait until at least one completion is ready, then drain.
    pub async fn next_ready_batch(&self) -> Vec<(u64, Completion)> {
        loop {
            let notified = self.inner.notify_ready.notified();
            let batch = self.drain_ready();
            if !batch.is_empty() {
                return batch;
            }
            notified.await;
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        match inner.queue.pop() {
            Some((id, job)) => {
                let result = job();
                inner.ready.push((id, result));
                inner.active.fetch_sub(1, Ordering::Relaxed);
                inner.notify_ready.notify_one();
            }
            None => {
                // Parking via a short blocking wait on the notify avoids a
                // busy spin; tokio's Notify is async-only so we degrade to a
                // brief sleep here since this loop runs on a plain OS thread.
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submitted_job_completes_on_ready_queue() {
        let pool = AsyncPool::new(2);
        let id = pool.submit(|| Box::new(40 + 2) as Box<dyn std::any::Any + Send>);
        let batch = pool.next_ready_batch().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0, id);
        let value = batch[0].1.downcast_ref::<i32>().copied();
        assert_eq!(value, Some(42));
    }
}
