//! Bounded pool for fire-and-forget work (notifications, analytics audit
//! records) that must not sit on the request path.
//!
//! Sizing follows a core/max model: `core_workers` tasks are started up front
//! and live for the life of the pool; when the queue is full, extra workers are
//! started up to `max_workers` and exit again after `keep_alive` without work.
//! When the queue is full and every worker is busy the submitting task runs the
//! job itself, so a burst slows callers down instead of losing events.
//!
//! Jobs never inherit task-local state from whoever submitted them. The trace
//! context is captured explicitly by [`BackgroundExecutor::execute`] and scoped
//! to that one job.

use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::{counter, gauge};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ExecutorConfig;
use crate::tracing::{scope_trace, TraceContext};

type Job = BoxFuture<'static, ()>;

#[derive(Clone)]
pub struct BackgroundExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExecutorConfig,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    workers: AtomicUsize,
    pending: AtomicUsize,
    idle: Notify,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// How a submitted job ended up being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// Queue was full; an extra worker was started for it
    Overflow,
    /// Queue full at max workers, or pool shut down; ran on the submitting task
    CallerRan,
}

impl BackgroundExecutor {
    /// Starts the core workers. Must be called from within a Tokio runtime.
    pub fn new(config: ExecutorConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(AsyncMutex::new(receiver)),
            workers: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            handles: Mutex::new(Vec::new()),
            config,
        });

        for _ in 0..inner.config.core_workers {
            inner.workers.fetch_add(1, Ordering::SeqCst);
            Inner::spawn_worker(&inner, None, false);
        }

        info!(
            core = inner.config.core_workers,
            max = inner.config.max_workers,
            queue = inner.config.queue_capacity,
            "background executor started"
        );

        Self { inner }
    }

    /// Submits `job` to run with `ctx` as its trace context.
    pub async fn execute<F>(&self, ctx: TraceContext, name: &'static str, job: F) -> Dispatch
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("background_task", trace_id = %ctx.trace_id, task = name);
        self.submit(name, scope_trace(ctx, job).instrument(span)).await
    }

    /// Submits a job with no trace context at all.
    pub async fn execute_untraced<F>(&self, name: &'static str, job: F) -> Dispatch
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("background_task", task = name);
        self.submit(name, job.instrument(span)).await
    }

    async fn submit<F>(&self, name: &'static str, job: F) -> Dispatch
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let wrapped = Inner::wrap(Arc::clone(&self.inner), name, job);

        let sender = self
            .inner
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());

        let Some(sender) = sender else {
            warn!(task = name, "executor is shut down; running on caller");
            wrapped.await;
            return Dispatch::CallerRan;
        };

        match sender.try_send(wrapped) {
            Ok(()) => Dispatch::Queued,
            Err(mpsc::error::TrySendError::Full(job)) => {
                if self.inner.try_reserve_worker() {
                    debug!(task = name, "queue full; starting overflow worker");
                    Inner::spawn_worker(&self.inner, Some(job), true);
                    Dispatch::Overflow
                } else {
                    warn!(task = name, "queue full at max workers; running on caller");
                    counter!("fulfillment_executor.caller_runs", 1);
                    job.await;
                    Dispatch::CallerRan
                }
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                job.await;
                Dispatch::CallerRan
            }
        }
    }

    /// Resolves once every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    /// Stops accepting queued work, drains what is already queued and waits for
    /// the workers to exit. Later submissions run on the caller.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.inner.sender.lock() {
            sender.take();
        }
        let handles = match self.inner.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!("executor worker ended abnormally: {}", e);
            }
        }
        info!("background executor stopped");
    }
}

impl Inner {
    fn wrap<F>(inner: Arc<Inner>, name: &'static str, job: F) -> Job
    where
        F: Future<Output = ()> + Send + 'static,
    {
        async move {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!(task = name, "background task panicked");
                counter!("fulfillment_executor.panics", 1);
            }
            if inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        }
        .boxed()
    }

    fn try_reserve_worker(&self) -> bool {
        let max = self.config.max_workers;
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    fn spawn_worker(inner: &Arc<Inner>, first: Option<Job>, overflow: bool) {
        let receiver = Arc::clone(&inner.receiver);
        let keep_alive = inner.config.keep_alive();
        let state = Arc::clone(inner);

        let handle = tokio::spawn(async move {
            if let Some(job) = first {
                job.await;
            }
            loop {
                let next = {
                    let mut rx = receiver.lock().await;
                    if overflow {
                        match tokio::time::timeout(keep_alive, rx.recv()).await {
                            Ok(job) => job,
                            Err(_) => None,
                        }
                    } else {
                        rx.recv().await
                    }
                };
                match next {
                    Some(job) => job.await,
                    None => break,
                }
            }
            let remaining = state.workers.fetch_sub(1, Ordering::SeqCst) - 1;
            gauge!("fulfillment_executor.workers", remaining as f64);
        });

        gauge!(
            "fulfillment_executor.workers",
            inner.workers.load(Ordering::SeqCst) as f64
        );
        if let Ok(mut handles) = inner.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::{current_trace_id, TraceId};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn small(core: usize, max: usize, queue: usize) -> ExecutorConfig {
        ExecutorConfig {
            core_workers: core,
            max_workers: max,
            queue_capacity: queue,
            keep_alive_secs: 1,
        }
    }

    #[tokio::test]
    async fn job_sees_captured_context() {
        let executor = BackgroundExecutor::new(small(1, 1, 4));
        let (tx, rx) = oneshot::channel();
        executor
            .execute(TraceContext::new(TraceId::new("t-1")), "capture_trace", async move {
                let _ = tx.send(current_trace_id());
            })
            .await;
        assert_eq!(rx.await.unwrap(), Some(TraceId::new("t-1")));
    }

    #[tokio::test]
    async fn context_does_not_leak_to_next_job_on_same_worker() {
        // One worker, so both jobs run on the same task
        let executor = BackgroundExecutor::new(small(1, 1, 4));
        executor
            .execute(TraceContext::new(TraceId::new("t-1")), "first", async {})
            .await;
        executor.wait_idle().await;

        let (tx, rx) = oneshot::channel();
        executor
            .execute_untraced("second", async move {
                let _ = tx.send(current_trace_id());
            })
            .await;
        assert_eq!(rx.await.unwrap(), None);
    }

    #[tokio::test]
    async fn caller_runs_when_saturated() {
        let executor = BackgroundExecutor::new(small(1, 1, 1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Occupies the only worker
        executor
            .execute_untraced("blocker", async move {
                let _ = release_rx.await;
            })
            .await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fills the queue
        assert_eq!(
            executor.execute_untraced("queued", async {}).await,
            Dispatch::Queued
        );

        let ran_inline = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_inline);
        let dispatch = executor
            .execute_untraced("overflow", async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;
        assert_eq!(dispatch, Dispatch::CallerRan);
        assert!(ran_inline.load(Ordering::SeqCst));

        let _ = release_tx.send(());
        executor.wait_idle().await;
        assert_eq!(executor.pending(), 0);
    }

    #[tokio::test]
    async fn overflow_worker_started_below_max() {
        let executor = BackgroundExecutor::new(small(1, 2, 1));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        executor
            .execute_untraced("blocker", async move {
                let _ = release_rx.await;
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.execute_untraced("queued", async {}).await;

        let dispatch = executor.execute_untraced("extra", async {}).await;
        assert_eq!(dispatch, Dispatch::Overflow);
        assert_eq!(executor.worker_count(), 2);

        let _ = release_tx.send(());
        executor.wait_idle().await;
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_worker() {
        let executor = BackgroundExecutor::new(small(1, 1, 4));
        executor
            .execute_untraced("boom", async { panic!("boom") })
            .await;
        executor.wait_idle().await;

        let (tx, rx) = oneshot::channel();
        executor
            .execute_untraced("after", async move {
                let _ = tx.send(42);
            })
            .await;
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let executor = BackgroundExecutor::new(small(2, 2, 16));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            executor
                .execute_untraced("count", async move {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }
        executor.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);

        // After shutdown work still runs, on the caller
        assert_eq!(
            executor.execute_untraced("late", async {}).await,
            Dispatch::CallerRan
        );
    }
}
