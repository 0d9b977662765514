use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::RequestStatus;

// Amounts are uint256 values kept as decimal strings so no precision is lost
// in SQLite's 64-bit INTEGER. Chain ids, nonces and block numbers fit in i64.
// Timestamps are unix milliseconds.

/// A bridge request observed on a source chain
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: i64,
    pub source_chain: i64,
    pub dest_chain: i64,
    pub nonce: i64,
    pub token: String,
    pub sender: String,
    pub recipient: String,
    pub amount: String,
    pub source_block_number: i64,
    pub source_tx_hash: String,
    pub dest_tx_hash: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Set when the request was deferred (insufficient liquidity)
    pub next_attempt_at: Option<i64>,
}

/// For inserting newly observed bridge requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBridgeRequest {
    pub source_chain: i64,
    pub dest_chain: i64,
    pub nonce: i64,
    pub token: String,
    pub sender: String,
    pub recipient: String,
    pub amount: String,
    pub source_block_number: i64,
    pub source_tx_hash: String,
}

/// Last fully scanned block of a source chain
#[derive(Debug, Clone, FromRow)]
pub struct ChainCheckpoint {
    pub chain_id: i64,
    pub last_block: i64,
    pub updated_at: i64,
}

/// Request counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl RequestStats {
    pub fn get(&self, status: RequestStatus) -> i64 {
        match status {
            RequestStatus::Pending => self.pending,
            RequestStatus::Processing => self.processing,
            RequestStatus::Completed => self.completed,
            RequestStatus::Failed => self.failed,
            RequestStatus::Skipped => self.skipped,
        }
    }

    pub(crate) fn set(&mut self, status: RequestStatus, count: i64) {
        match status {
            RequestStatus::Pending => self.pending = count,
            RequestStatus::Processing => self.processing = count,
            RequestStatus::Completed => self.completed = count,
            RequestStatus::Failed => self.failed = count,
            RequestStatus::Skipped => self.skipped = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed + self.skipped
    }
}
