use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::product::StockPolicy;
use crate::store::DEFAULT_SHARDS;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    author,
    version,
    about = "Accepts product update events and applies them asynchronously"
)]
pub struct Cli {
    /// Optional TOML file; flags and environment variables override its values.
    #[arg(long, env = "PRODUCT_SERVICE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Socket address the HTTP server binds to. Use port 0 for an ephemeral port.
    #[arg(long, env = "PRODUCT_SERVICE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Number of workers applying queued events.
    #[arg(long, env = "PRODUCT_SERVICE_WORKERS")]
    pub workers: Option<usize>,

    /// Maximum number of accepted events waiting for a worker.
    #[arg(long, env = "PRODUCT_SERVICE_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Number of independently locked store partitions.
    #[arg(long, env = "PRODUCT_SERVICE_STORE_SHARDS")]
    pub store_shards: Option<usize>,

    /// How long shutdown waits for queued events to be applied.
    #[arg(long, env = "PRODUCT_SERVICE_DRAIN_TIMEOUT_MS")]
    pub drain_timeout_ms: Option<u64>,

    /// Accept negative stock levels. `--allow-backorders=false` turns off a
    /// file setting.
    #[arg(
        long,
        env = "PRODUCT_SERVICE_ALLOW_BACKORDERS",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub allow_backorders: Option<bool>,
}

/// Fully resolved service settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub listen: SocketAddr,
    pub workers: usize,
    pub queue_capacity: usize,
    pub store_shards: usize,
    pub drain_timeout_ms: u64,
    pub allow_backorders: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            workers: 4,
            queue_capacity: 100,
            store_shards: DEFAULT_SHARDS,
            drain_timeout_ms: 5_000,
            allow_backorders: false,
        }
    }
}

impl Settings {
    /// Builds settings from defaults, the optional config file and the CLI,
    /// in increasing order of precedence.
    pub fn resolve(cli: &Cli) -> Result<Self, ServiceError> {
        let base = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let settings = base.with_overrides(cli);
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServiceError::Config {
            context: "read",
            detail: format!("'{}': {e}", path.display()),
        })?;
        toml::from_str(&content).map_err(|e| ServiceError::Config {
            context: "parse",
            detail: format!("'{}': {e}", path.display()),
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ServiceError> {
        toml::from_str(content).map_err(|e| ServiceError::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }

    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(listen) = cli.listen {
            self.listen = listen;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        if let Some(capacity) = cli.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(shards) = cli.store_shards {
            self.store_shards = shards;
        }
        if let Some(timeout) = cli.drain_timeout_ms {
            self.drain_timeout_ms = timeout;
        }
        if let Some(allow) = cli.allow_backorders {
            self.allow_backorders = allow;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        let invalid = |detail: &str| ServiceError::Config {
            context: "validate",
            detail: detail.to_string(),
        };
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1"));
        }
        if self.store_shards == 0 {
            return Err(invalid("store_shards must be at least 1"));
        }
        Ok(())
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn stock_policy(&self) -> StockPolicy {
        StockPolicy::from_allow_backorders(self.allow_backorders)
    }
}
