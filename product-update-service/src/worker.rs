//! Fixed-size pool of tasks that drain the event queue into an [`EventSink`].
//!
//! Every worker loops on `select!` between the pool's cancellation token and
//! the next queued event. It stops when the token is cancelled or when the
//! queue is closed and empty. Applying an event happens outside the `select!`,
//! so an event that has been dequeued is always applied before the worker
//! looks at the token again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::queue::EventQueue;

/// Destination of dequeued events.
///
/// Failures are logged and counted by the worker that hit them; they never
/// stop the worker and never reach the producer, which was answered at
/// admission time.
pub trait EventSink: Send + Sync + 'static {
    type Event: Send + 'static;

    fn apply(&self, event: Self::Event) -> anyhow::Result<()>;
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    QueueClosed,
}

#[derive(Debug, Default)]
pub struct PoolStats {
    applied: AtomicU64,
    failed: AtomicU64,
}

impl PoolStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Outcome of joining every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    pub queue_closed: usize,
    pub cancelled: usize,
    pub panicked: usize,
    /// `true` when the workers exited on their own, without cancellation.
    pub drained: bool,
}

pub struct WorkerPool {
    workers: JoinSet<WorkerExit>,
    size: usize,
    token: CancellationToken,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers on the current Tokio runtime.
    pub fn start<S>(
        worker_count: usize,
        queue: Arc<EventQueue<S::Event>>,
        sink: Arc<S>,
        token: CancellationToken,
    ) -> Self
    where
        S: EventSink,
    {
        let stats = Arc::new(PoolStats::default());
        let mut workers = JoinSet::new();

        for id in 0..worker_count {
            let worker = Worker {
                queue: Arc::clone(&queue),
                sink: Arc::clone(&sink),
                token: token.clone(),
                stats: Arc::clone(&stats),
            };
            workers.spawn(worker.run().instrument(info_span!("worker", id)));
        }

        info!(workers = worker_count, "worker pool started");
        Self {
            workers,
            size: worker_count,
            token,
            stats,
        }
    }

    /// Number of workers the pool was started with.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Asks every worker to stop after its current event.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits until every worker has stopped.
    ///
    /// Workers only stop on cancellation or once the queue is closed and
    /// drained, so the caller must arrange for one of the two.
    pub async fn join(mut self) -> PoolReport {
        let mut report = PoolReport::default();
        self.collect(&mut report).await;
        report.drained = report.cancelled == 0;
        self.finish(report)
    }

    /// Cancels the workers and waits for them.
    pub async fn stop(self) -> PoolReport {
        self.cancel();
        self.join().await
    }

    /// Gives the workers `grace` to drain a closed queue, then cancels
    /// whichever are still running and waits for them.
    pub async fn shutdown(mut self, grace: Duration) -> PoolReport {
        let mut report = PoolReport::default();
        let drained = tokio::time::timeout(grace, self.collect(&mut report))
            .await
            .is_ok();

        if !drained {
            warn!(?grace, "workers did not drain in time, cancelling");
            self.token.cancel();
            self.collect(&mut report).await;
        }

        report.drained = drained;
        self.finish(report)
    }

    async fn collect(&mut self, report: &mut PoolReport) {
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(WorkerExit::QueueClosed) => report.queue_closed += 1,
                Ok(WorkerExit::Cancelled) => report.cancelled += 1,
                Err(err) => {
                    warn!(error = %err, "worker task failed");
                    report.panicked += 1;
                }
            }
        }
    }

    fn finish(&self, report: PoolReport) -> PoolReport {
        info!(
            applied = self.stats.applied(),
            failed = self.stats.failed(),
            ?report,
            "worker pool stopped"
        );
        report
    }
}

struct Worker<S: EventSink> {
    queue: Arc<EventQueue<S::Event>>,
    sink: Arc<S>,
    token: CancellationToken,
    stats: Arc<PoolStats>,
}

impl<S: EventSink> Worker<S> {
    async fn run(self) -> WorkerExit {
        debug!("worker running");
        let exit = loop {
            let next = select! {
                biased;
                _ = self.token.cancelled() => None,
                next = self.queue.dequeue() => Some(next),
            };

            match next {
                None => break WorkerExit::Cancelled,
                Some(None) => break WorkerExit::QueueClosed,
                Some(Some(event)) => self.handle(event),
            }
        };

        debug!(?exit, "worker stopped");
        exit
    }

    fn handle(&self, event: S::Event) {
        match self.sink.apply(event) {
            Ok(()) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = ?err, "failed to apply event");
            }
        }
    }
}
