//! Release execution for pending bridge requests
//!
//! Each request is resolved fully before the next one starts:
//! idempotency check, gas selection, a retried `releaseFunds` submission,
//! and a single-row status update that records the classified outcome.

use eyre::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, ChainSet, ReleaseCall};
use crate::db::{self, BridgeRequest};
use crate::gas::GasManager;
use crate::metrics;
use crate::types::now_millis;

pub mod retry;

pub use retry::{with_retry, RetryConfig};

/// Executor behaviour switches
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Log the intended release instead of submitting it
    pub dry_run: bool,
    /// How long an insufficient-liquidity request is kept out of the queue
    pub liquidity_backoff: Duration,
    /// How long a request is kept out of the queue when its destination
    /// cannot be reached or is not configured
    pub unavailable_backoff: Duration,
    pub retry: RetryConfig,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            dry_run: false,
            liquidity_backoff: Duration::from_secs(300),
            unavailable_backoff: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// What happened to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Released; carries the destination transaction hash
    Completed(String),
    /// The destination had already processed the nonce
    Skipped,
    /// Dry run: the release was logged, nothing was stored
    DryRun,
    /// Insufficient liquidity; left pending until the backoff passes
    Deferred,
    /// Release failed and counted against the retry budget
    Failed(String),
    /// Nothing could be attempted (RPC read failed, destination unknown);
    /// kept out of the queue for the unavailable backoff, without penalty
    Postponed,
}

impl RequestOutcome {
    /// True when the request needs no further work from this run
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            RequestOutcome::Completed(_) | RequestOutcome::Skipped | RequestOutcome::DryRun
        )
    }

    fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Completed(_) => "completed",
            RequestOutcome::Skipped => "skipped",
            RequestOutcome::DryRun => "dry_run",
            RequestOutcome::Deferred => "deferred",
            RequestOutcome::Failed(_) => "failed",
            RequestOutcome::Postponed => "postponed",
        }
    }
}

/// Tally of one processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Rows returned to `pending` from an interrupted run
    pub recovered: u64,
    pub attempted: usize,
    pub completed: usize,
    pub skipped: usize,
    pub dry_run: usize,
    pub deferred: usize,
    pub failed: usize,
    pub postponed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &RequestOutcome) {
        self.attempted += 1;
        match outcome {
            RequestOutcome::Completed(_) => self.completed += 1,
            RequestOutcome::Skipped => self.skipped += 1,
            RequestOutcome::DryRun => self.dry_run += 1,
            RequestOutcome::Deferred => self.deferred += 1,
            RequestOutcome::Failed(_) => self.failed += 1,
            RequestOutcome::Postponed => self.postponed += 1,
        }
    }

    /// Requests resolved by this pass
    pub fn resolved(&self) -> usize {
        self.completed + self.skipped + self.dry_run
    }

    /// Requests left for a later run
    pub fn unresolved(&self) -> usize {
        self.attempted - self.resolved()
    }
}

/// Submits releases on destination chains
pub struct Executor {
    db: SqlitePool,
    chains: ChainSet,
    gas: GasManager,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(db: SqlitePool, chains: ChainSet, settings: ExecutorSettings) -> Self {
        Self::with_gas_manager(db, chains, settings, GasManager::new())
    }

    pub fn with_gas_manager(
        db: SqlitePool,
        chains: ChainSet,
        settings: ExecutorSettings,
        gas: GasManager,
    ) -> Self {
        Self {
            db,
            chains,
            gas,
            settings,
        }
    }

    /// Process up to `limit` eligible requests, oldest first
    pub async fn process_batch(&mut self, limit: u32) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            recovered: db::reset_interrupted_requests(&self.db).await?,
            ..BatchSummary::default()
        };
        if summary.recovered > 0 {
            warn!(
                count = summary.recovered,
                "Returned requests left in processing by an interrupted run to pending"
            );
        }

        let requests = db::get_pending_requests(&self.db, limit as i64, now_millis()).await?;
        if requests.is_empty() {
            debug!("No pending bridge requests");
            return Ok(summary);
        }

        info!(count = requests.len(), "Processing pending bridge requests");

        for request in &requests {
            let outcome = self.process_request(request).await?;
            summary.record(&outcome);
        }

        Ok(summary)
    }

    /// Resolve a single request. Store errors are returned; chain errors are
    /// folded into the outcome.
    pub async fn process_request(&mut self, request: &BridgeRequest) -> Result<RequestOutcome> {
        let outcome = self.resolve(request).await?;

        let dest_label = request.dest_chain.to_string();
        metrics::record_release_outcome(&dest_label, outcome.label());

        Ok(outcome)
    }

    async fn resolve(&mut self, request: &BridgeRequest) -> Result<RequestOutcome> {
        let source_chain = request.source_chain as u64;
        let nonce = request.nonce as u64;

        let Some(dest) = self.chains.get(request.dest_chain as u64).cloned() else {
            warn!(
                id = request.id,
                source_chain,
                nonce,
                dest_chain = request.dest_chain,
                "Destination chain is not configured, postponing request"
            );
            return self
                .postpone(request, "destination chain not configured")
                .await;
        };

        match dest.client.is_nonce_processed(source_chain, nonce).await {
            Ok(true) => {
                info!(
                    id = request.id,
                    source_chain,
                    nonce,
                    dest_chain = dest.chain_id(),
                    "Nonce already processed on destination, skipping"
                );
                db::mark_skipped(&self.db, request.id).await?;
                return Ok(RequestOutcome::Skipped);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    id = request.id,
                    source_chain,
                    nonce,
                    dest_chain = dest.chain_id(),
                    error = %e,
                    "Idempotency check failed, postponing request"
                );
                return self
                    .postpone(request, &format!("idempotency check failed: {}", e))
                    .await;
            }
        }

        let call = ReleaseCall {
            nonce,
            source_chain,
            token: request.token.clone(),
            recipient: request.recipient.clone(),
            amount: request.amount.clone(),
        };

        if self.settings.dry_run {
            info!(
                id = request.id,
                dest_chain = dest.chain_id(),
                source_chain,
                nonce,
                token = %call.token,
                recipient = %call.recipient,
                amount = %call.amount,
                "[DRY RUN] Would call releaseFunds"
            );
            return Ok(RequestOutcome::DryRun);
        }

        let gas = match self.gas.get_gas_params(&dest).await {
            Ok(gas) => gas,
            Err(e) => {
                warn!(
                    id = request.id,
                    dest_chain = dest.chain_id(),
                    error = %e,
                    "Failed to get gas price, postponing request"
                );
                return self
                    .postpone(request, &format!("gas price unavailable: {}", e))
                    .await;
            }
        };

        db::mark_processing(&self.db, request.id).await?;

        let client = dest.client.clone();
        let result = with_retry(&self.settings.retry, |attempt| {
            let client = client.clone();
            let call = call.clone();
            async move {
                debug!(source_chain, nonce, attempt, "Submitting release");
                client.release_funds(&call, &gas).await
            }
        })
        .await;

        if let Err(e) = &result {
            metrics::record_release_error(&dest.chain_id().to_string(), e.kind());
        }

        match result {
            Ok(tx_hash) => {
                info!(
                    id = request.id,
                    source_chain,
                    nonce,
                    dest_chain = dest.chain_id(),
                    tx_hash = %tx_hash,
                    "Release confirmed"
                );
                db::mark_completed(&self.db, request.id, &tx_hash).await?;
                Ok(RequestOutcome::Completed(tx_hash))
            }
            Err(ChainError::AlreadyProcessed) => {
                info!(
                    id = request.id,
                    source_chain,
                    nonce,
                    "Release reverted as already processed, another relayer won the race"
                );
                db::mark_skipped(&self.db, request.id).await?;
                Ok(RequestOutcome::Skipped)
            }
            Err(ChainError::InsufficientLiquidity) => {
                let retry_at = now_millis() + self.settings.liquidity_backoff.as_millis() as i64;
                warn!(
                    id = request.id,
                    source_chain,
                    nonce,
                    dest_chain = dest.chain_id(),
                    backoff_secs = self.settings.liquidity_backoff.as_secs(),
                    "Insufficient liquidity on destination, deferring request"
                );
                db::defer_request(
                    &self.db,
                    request.id,
                    &ChainError::InsufficientLiquidity.to_string(),
                    retry_at,
                )
                .await?;
                Ok(RequestOutcome::Deferred)
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    id = request.id,
                    source_chain,
                    nonce,
                    dest_chain = dest.chain_id(),
                    retry_count = request.retry_count + 1,
                    error = %message,
                    "Release failed"
                );
                db::mark_failed(&self.db, request.id, &message).await?;
                Ok(RequestOutcome::Failed(message))
            }
        }
    }

    /// Keep a request out of the queue for the unavailable backoff. Status
    /// and retry count are left as they are.
    async fn postpone(&self, request: &BridgeRequest, reason: &str) -> Result<RequestOutcome> {
        let retry_at = now_millis() + self.settings.unavailable_backoff.as_millis() as i64;
        db::postpone_request(&self.db, request.id, reason, retry_at).await?;
        Ok(RequestOutcome::Postponed)
    }
}
