//! Bounded worker pool.
//!
//! Submitted tasks go into an explicit FIFO queue. A dispatcher pulls them in
//! order and starts each one once a semaphore permit is free, so at most
//! `size` run at a time. The queue itself is unbounded: submission never
//! blocks and never fails while the pool is open. A closed pool drops every
//! task that has not started yet.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, warn};

type Task = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

impl Counters {
    fn is_idle(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) == 0
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    size: usize,
    tx: mpsc::UnboundedSender<Task>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Start a pool running at most `size` tasks concurrently (minimum 1).
    /// Must be called from within a Tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(dispatch(rx, Arc::new(Semaphore::new(size)), counters.clone()));
        Self { size, tx, counters }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task. It runs after every task submitted before it has started.
    pub fn submit<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        let boxed: Task = Box::new(move || task().boxed());
        if self.is_closed() || self.tx.send(boxed).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("worker pool is closed, task dropped");
        }
    }

    /// Stop starting tasks. Running tasks finish; queued ones are discarded.
    pub fn close(&self) {
        if !self.counters.closed.swap(true, Ordering::SeqCst) {
            debug!(queued = self.queued(), "worker pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Resolve once nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Task>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
) {
    while let Some(task) = rx.recv().await {
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        if counters.closed.load(Ordering::SeqCst) {
            drop(task);
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            if counters.is_idle() {
                counters.idle.notify_waiters();
            }
            continue;
        }
        // Bump active before dropping queued so the pool never looks idle in between.
        counters.active.fetch_add(1, Ordering::SeqCst);
        counters.queued.fetch_sub(1, Ordering::SeqCst);

        let counters = counters.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { task().await }).catch_unwind().await;
            if outcome.is_err() {
                error!("worker task panicked; pool continues");
            }
            drop(permit);
            counters.active.fetch_sub(1, Ordering::SeqCst);
            if counters.is_idle() {
                counters.idle.notify_waiters();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn never_exceeds_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn starts_tasks_in_submission_order() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            pool.submit(move || async move {
                order.lock().unwrap().push(i);
            });
        }
        pool.wait_idle().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_task_does_not_kill_pool() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(|| async { panic!("boom") });
        let r = ran.clone();
        pool.submit(move || async move {
            r.fetch_add(1, Ordering::SeqCst);
        });

        pool.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closing_discards_queued_tasks() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            pool.submit(move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.close();
        pool.wait_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        pool.submit(|| async {});
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn wait_idle_on_fresh_pool_returns() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        tokio::time::timeout(Duration::from_secs(1), pool.wait_idle())
            .await
            .unwrap();
    }
}
