//! Source-chain scanner
//!
//! One bounded pass per chain per run: pick up from the checkpoint, read
//! `BridgeInitiated` logs up to the confirmation-safe head (at most
//! `max_block_range` blocks at a time), insert them idempotently, then
//! advance the checkpoint to the end of the scanned range.

use eyre::{eyre, Result};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::chain::{BridgeEvent, ChainHandle};
use crate::db::{self, NewBridgeRequest};
use crate::metrics;

/// Blocks behind the head a chain starts from when it has no checkpoint and
/// no configured start block
pub const FIRST_RUN_LOOKBACK: u64 = 100;

/// What a scan pass will do, derived from the checkpoint and the chain head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlan {
    /// Last block considered already scanned
    pub start_block: u64,
    /// Head minus confirmations
    pub safe_block: u64,
    /// Inclusive block range to fetch, `None` when there is nothing safe to scan
    pub range: Option<(u64, u64)>,
}

impl ScanPlan {
    pub fn new(
        checkpoint: Option<u64>,
        start_override: Option<u64>,
        head: u64,
        confirmations: u64,
        max_block_range: u64,
    ) -> Self {
        let start_block = checkpoint
            .or(start_override)
            .unwrap_or_else(|| head.saturating_sub(FIRST_RUN_LOOKBACK));
        let safe_block = head.saturating_sub(confirmations);

        let range = if safe_block <= start_block {
            None
        } else {
            let from = start_block + 1;
            let to = safe_block.min(from.saturating_add(max_block_range));
            Some((from, to))
        };

        Self {
            start_block,
            safe_block,
            range,
        }
    }
}

/// Reads bridge events from source chains into the store
pub struct Scanner {
    db: SqlitePool,
}

impl Scanner {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Scan one chain. Returns the requests that were newly inserted.
    pub async fn scan(&self, chain: &ChainHandle) -> Result<Vec<NewBridgeRequest>> {
        let chain_id = chain.chain_id();
        let chain_key = to_i64(chain_id, "chain id")?;

        let checkpoint = db::get_checkpoint(&self.db, chain_key)
            .await?
            .map(|block| block as u64);
        let head = chain.client.block_number().await?;

        let plan = ScanPlan::new(
            checkpoint,
            chain.config.start_block,
            head,
            chain.config.confirmations,
            chain.config.max_block_range,
        );

        let Some((from_block, to_block)) = plan.range else {
            debug!(
                chain_id,
                head,
                safe_block = plan.safe_block,
                start_block = plan.start_block,
                "No confirmed blocks to scan"
            );
            if checkpoint.is_none() {
                db::save_checkpoint(&self.db, chain_key, to_i64(plan.start_block, "block")?)
                    .await?;
                metrics::record_checkpoint(chain.name(), plan.start_block);
            }
            return Ok(Vec::new());
        };

        info!(
            chain_id,
            chain_name = %chain.name(),
            from_block,
            to_block,
            head,
            "Scanning blocks"
        );

        let events = chain.client.bridge_events(from_block, to_block).await?;

        let mut inserted = Vec::new();
        for event in &events {
            if event.source_chain != chain_id {
                warn!(
                    chain_id,
                    event_source_chain = event.source_chain,
                    nonce = event.nonce,
                    tx_hash = %event.tx_hash,
                    "Ignoring BridgeInitiated event with a foreign source chain"
                );
                metrics::record_event_rejected(chain.name(), "foreign_source");
                continue;
            }

            let request = match new_request(event) {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        chain_id,
                        nonce = event.nonce,
                        dest_chain = event.dest_chain,
                        tx_hash = %event.tx_hash,
                        error = %e,
                        "Ignoring BridgeInitiated event that cannot be stored"
                    );
                    metrics::record_event_rejected(chain.name(), "out_of_range");
                    continue;
                }
            };
            if db::insert_bridge_request(&self.db, &request).await? {
                info!(
                    source_chain = event.source_chain,
                    dest_chain = event.dest_chain,
                    nonce = event.nonce,
                    token = %event.token,
                    amount = %event.amount,
                    block_number = event.block_number,
                    tx_hash = %event.tx_hash,
                    "New bridge request detected"
                );
                inserted.push(request);
            } else {
                debug!(chain_id, nonce = event.nonce, "Bridge request already known");
            }
        }

        db::save_checkpoint(&self.db, chain_key, to_i64(to_block, "block")?).await?;

        metrics::record_events_ingested(chain.name(), inserted.len());
        metrics::record_checkpoint(chain.name(), to_block);

        info!(
            chain_id,
            events = events.len(),
            new_requests = inserted.len(),
            checkpoint = to_block,
            "Scan complete"
        );

        Ok(inserted)
    }
}

fn new_request(event: &BridgeEvent) -> Result<NewBridgeRequest> {
    Ok(NewBridgeRequest {
        source_chain: to_i64(event.source_chain, "source chain")?,
        dest_chain: to_i64(event.dest_chain, "dest chain")?,
        nonce: to_i64(event.nonce, "nonce")?,
        token: event.token.clone(),
        sender: event.sender.clone(),
        recipient: event.recipient.clone(),
        amount: event.amount.clone(),
        source_block_number: to_i64(event.block_number, "block number")?,
        source_tx_hash: event.tx_hash.clone(),
    })
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| eyre!("{} {} exceeds the storable range", field, value))
}
