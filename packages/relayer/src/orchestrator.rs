//! One relayer run: lease, configuration, store, scan, execute, report

use eyre::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chain::{connect_all, ChainSet};
use crate::config::{BootstrapConfig, Config};
use crate::db::{self, RequestStats};
use crate::executor::{BatchSummary, Executor, ExecutorSettings, RetryConfig};
use crate::lease::{FileLease, LeaseGuard};
use crate::metrics;
use crate::scanner::Scanner;

/// Result of a single pass over all chains
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub chains_scanned: usize,
    pub chains_failed: usize,
    pub new_events: usize,
    pub batch: BatchSummary,
    /// Store totals after the run
    pub stats: RequestStats,
}

/// How an invocation ended
#[derive(Debug, Clone)]
pub enum RunExit {
    Completed(RunSummary),
    /// Another run holds the lease
    LeaseHeld,
}

/// The scan and execute pipeline over an open store and connected chains
pub struct Relayer {
    config: Config,
    db: SqlitePool,
    chains: ChainSet,
}

impl Relayer {
    pub fn new(config: Config, db: SqlitePool, chains: ChainSet) -> Self {
        Self { config, db, chains }
    }

    fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            dry_run: self.config.relayer.dry_run,
            liquidity_backoff: Duration::from_secs(self.config.relayer.liquidity_backoff_secs),
            unavailable_backoff: Duration::from_secs(self.config.relayer.unavailable_backoff_secs),
            retry: RetryConfig::from(&self.config.retry),
        }
    }

    /// Scan every chain in configuration order, then process one batch
    pub async fn run_once(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let scanner = Scanner::new(self.db.clone());
        for chain in self.chains.iter() {
            match scanner.scan(chain).await {
                Ok(inserted) => {
                    summary.chains_scanned += 1;
                    summary.new_events += inserted.len();
                }
                Err(e) => {
                    summary.chains_failed += 1;
                    metrics::record_scan_error(chain.name());
                    error!(
                        chain_id = chain.chain_id(),
                        chain_name = %chain.name(),
                        error = %e,
                        "Scan failed, skipping chain for this run"
                    );
                }
            }
        }

        let mut executor =
            Executor::new(self.db.clone(), self.chains.clone(), self.executor_settings());
        summary.batch = executor.process_batch(self.config.relayer.batch_size).await?;

        summary.stats = db::get_stats(&self.db).await?;
        metrics::record_status_totals(&summary.stats);
        metrics::record_run_finished();

        info!(
            chains_scanned = summary.chains_scanned,
            chains_failed = summary.chains_failed,
            new_events = summary.new_events,
            processed = summary.batch.attempted,
            completed = summary.batch.completed,
            skipped = summary.batch.skipped,
            deferred = summary.batch.deferred,
            failed = summary.batch.failed,
            postponed = summary.batch.postponed,
            dry_run = summary.batch.dry_run,
            total_pending = summary.stats.pending,
            total_completed = summary.stats.completed,
            total_failed = summary.stats.failed,
            total_skipped = summary.stats.skipped,
            total_requests = summary.stats.total(),
            "Relayer run complete"
        );

        Ok(summary)
    }
}

/// Full invocation. The lease is released on every return path.
pub async fn execute(bootstrap: &BootstrapConfig) -> Result<RunExit> {
    let Some(_guard) = LeaseGuard::acquire(
        FileLease::new(&bootstrap.lock_file),
        bootstrap.lock_stale_after,
    )?
    else {
        info!(
            lock_file = %bootstrap.lock_file.display(),
            "Another relayer run holds the lease, exiting"
        );
        return Ok(RunExit::LeaseHeld);
    };

    let config = Config::load()?;
    info!(
        chains = config.chains.len(),
        dry_run = config.relayer.dry_run,
        batch_size = config.relayer.batch_size,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.path).await?;
    db::run_migrations(&pool).await?;
    info!(path = %config.database.path.display(), "Database ready");

    let chains = connect_all(&config.chains, &config.relayer.private_key);
    if chains.is_empty() {
        warn!("No chain client could be created, nothing will be scanned or released");
    } else {
        info!(
            connected = chains.len(),
            configured = config.chains.len(),
            "Chain clients ready"
        );
    }
    let metrics_textfile = config.relayer.metrics_textfile.clone();

    let relayer = Relayer::new(config, pool.clone(), chains);
    let result = relayer.run_once().await;

    if let Some(path) = metrics_textfile {
        if let Err(e) = metrics::write_textfile(&path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
        }
    }

    pool.close().await;

    Ok(RunExit::Completed(result?))
}
