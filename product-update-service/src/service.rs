//! Wires the queue, worker pool, store and HTTP server into one process and
//! owns the shutdown sequence.
//!
//! Shutdown drains before it exits: the HTTP server stops first, then the
//! queue is closed so late admissions are rejected, then the workers get
//! `drain_timeout` to apply everything that was accepted. Only if that
//! deadline passes are the workers cancelled; whatever is still queued at that
//! point is reported as unprocessed.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ServiceError;
use crate::http::{self, AppState};
use crate::product::Product;
use crate::queue::EventQueue;
use crate::store::ProductStore;
use crate::worker::{PoolReport, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub pool: PoolReport,
    /// Accepted events that were never applied.
    pub unprocessed: usize,
    /// Products held by the store when the service stopped.
    pub products: usize,
}

pub struct Service {
    listener: TcpListener,
    settings: Settings,
    store: Arc<ProductStore>,
    queue: Arc<EventQueue<Product>>,
}

impl Service {
    pub async fn bind(settings: Settings) -> Result<Self, ServiceError> {
        settings.validate()?;
        let listener = TcpListener::bind(settings.listen)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: settings.listen,
                source,
            })?;

        Ok(Self {
            listener,
            store: Arc::new(ProductStore::with_shards(settings.store_shards)),
            queue: Arc::new(EventQueue::new(settings.queue_capacity)),
            settings,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Arc<ProductStore> {
        Arc::clone(&self.store)
    }

    pub fn queue(&self) -> Arc<EventQueue<Product>> {
        Arc::clone(&self.queue)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<ShutdownReport, ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Service {
            listener,
            settings,
            store,
            queue,
        } = self;

        let token = CancellationToken::new();
        let pool = WorkerPool::start(
            settings.workers,
            Arc::clone(&queue),
            Arc::clone(&store),
            token.clone(),
        );

        let app = http::router(AppState {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            stock_policy: settings.stock_policy(),
        });

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        info!("http server stopped, draining queued events");

        queue.close();
        let pool = pool.shutdown(settings.drain_timeout()).await;

        let report = ShutdownReport {
            pool,
            unprocessed: queue.len(),
            products: store.len(),
        };
        if report.unprocessed > 0 {
            warn!(
                unprocessed = report.unprocessed,
                "accepted events were dropped at shutdown"
            );
        }
        info!(?report, "service stopped");

        served?;
        Ok(report)
    }

    /// Runs until the process receives Ctrl-C or, on unix, SIGTERM.
    ///
    /// The handlers are installed before the server starts accepting, so a
    /// signal that arrives once requests are being served always drains.
    pub async fn run_until_signal(self) -> Result<ShutdownReport, ServiceError> {
        let shutdown = shutdown_signal();
        self.run_until(shutdown).await
    }
}

fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    #[cfg(unix)]
    let terminate = {
        use tokio::signal::unix::{SignalKind, signal};

        let installed = signal(SignalKind::terminate());
        async move {
            match installed {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    warn!(error = ?err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
        }
    }
}
