//! Persistent store for bridge requests and per-chain checkpoints
//!
//! Backed by a single SQLite file in WAL journal mode. The relayer is a
//! single-shot batch job, so the pool holds exactly one connection and every
//! status transition is a single-row `UPDATE`.

use eyre::{Result, WrapErr};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::{now_millis, RequestStatus};

pub mod models;

pub use models::*;

/// Requests that failed this many times are no longer picked up
pub const MAX_RETRY_COUNT: i64 = 5;

/// SQL SELECT columns for the bridge_requests table
const REQUEST_SELECT: &str = r#"id, source_chain, dest_chain, nonce, token, sender, recipient,
    amount, source_block_number, source_tx_hash, dest_tx_hash, status, retry_count,
    last_error, created_at, updated_at, next_attempt_at"#;

/// Open (creating if missing) the database file
pub async fn create_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .wrap_err_with(|| format!("Failed to open database at {}", path.display()))
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Insert a newly observed request, ignoring it if `(source_chain, nonce)`
/// is already known. Returns true when a row was created.
pub async fn insert_bridge_request(pool: &SqlitePool, request: &NewBridgeRequest) -> Result<bool> {
    let now = now_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO bridge_requests (source_chain, dest_chain, nonce, token, sender, recipient,
            amount, source_block_number, source_tx_hash, status, retry_count, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 0, ?10, ?10)
        ON CONFLICT (source_chain, nonce) DO NOTHING
        "#,
    )
    .bind(request.source_chain)
    .bind(request.dest_chain)
    .bind(request.nonce)
    .bind(&request.token)
    .bind(&request.sender)
    .bind(&request.recipient)
    .bind(&request.amount)
    .bind(request.source_block_number)
    .bind(&request.source_tx_hash)
    .bind(now)
    .execute(pool)
    .await
    .wrap_err_with(|| {
        format!(
            "Failed to insert bridge request (source_chain={}, nonce={})",
            request.source_chain, request.nonce
        )
    })?;

    Ok(result.rows_affected() == 1)
}

/// Get requests eligible for processing, oldest first.
///
/// Eligible means `pending` or `failed`, below [`MAX_RETRY_COUNT`], and not
/// deferred past `now_ms`.
pub async fn get_pending_requests(
    pool: &SqlitePool,
    limit: i64,
    now_ms: i64,
) -> Result<Vec<BridgeRequest>> {
    let query = format!(
        "SELECT {} FROM bridge_requests
         WHERE status IN ('pending', 'failed')
           AND retry_count < ?1
           AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
         ORDER BY created_at ASC, id ASC
         LIMIT ?3",
        REQUEST_SELECT
    );
    let rows = sqlx::query_as::<_, BridgeRequest>(&query)
        .bind(MAX_RETRY_COUNT)
        .bind(now_ms)
        .bind(limit)
        .fetch_all(pool)
        .await
        .wrap_err("Failed to get pending bridge requests")?;

    Ok(rows)
}

/// Look up a request by its identity
pub async fn get_request(
    pool: &SqlitePool,
    source_chain: i64,
    nonce: i64,
) -> Result<Option<BridgeRequest>> {
    let query = format!(
        "SELECT {} FROM bridge_requests WHERE source_chain = ?1 AND nonce = ?2",
        REQUEST_SELECT
    );
    let row = sqlx::query_as::<_, BridgeRequest>(&query)
        .bind(source_chain)
        .bind(nonce)
        .fetch_optional(pool)
        .await
        .wrap_err("Failed to get bridge request")?;

    Ok(row)
}

/// Claim a request for submission
pub async fn mark_processing(pool: &SqlitePool, id: i64) -> Result<()> {
    update_status(pool, id, RequestStatus::Processing).await
}

/// Record a successful release
pub async fn mark_completed(pool: &SqlitePool, id: i64, dest_tx_hash: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE bridge_requests
           SET status = 'completed', dest_tx_hash = ?1, last_error = NULL,
               next_attempt_at = NULL, updated_at = ?2
           WHERE id = ?3"#,
    )
    .bind(dest_tx_hash)
    .bind(now_millis())
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to mark bridge request {} completed", id))?;

    Ok(())
}

/// Record that the nonce was already released by someone else
pub async fn mark_skipped(pool: &SqlitePool, id: i64) -> Result<()> {
    update_status(pool, id, RequestStatus::Skipped).await
}

/// Record a failed release attempt, counting it against the retry budget
pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE bridge_requests
           SET status = 'failed', retry_count = retry_count + 1, last_error = ?1,
               updated_at = ?2
           WHERE id = ?3"#,
    )
    .bind(error)
    .bind(now_millis())
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to mark bridge request {} failed", id))?;

    Ok(())
}

/// Put a request back to `pending` without touching its retry count, and
/// keep it out of [`get_pending_requests`] until `retry_at_ms`.
pub async fn defer_request(
    pool: &SqlitePool,
    id: i64,
    reason: &str,
    retry_at_ms: i64,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE bridge_requests
           SET status = 'pending', last_error = ?1, next_attempt_at = ?2, updated_at = ?3
           WHERE id = ?4"#,
    )
    .bind(reason)
    .bind(retry_at_ms)
    .bind(now_millis())
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to defer bridge request {}", id))?;

    Ok(())
}

/// Keep a request out of [`get_pending_requests`] until `retry_at_ms`
/// without changing its status or retry count
pub async fn postpone_request(
    pool: &SqlitePool,
    id: i64,
    reason: &str,
    retry_at_ms: i64,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE bridge_requests
           SET last_error = ?1, next_attempt_at = ?2, updated_at = ?3
           WHERE id = ?4"#,
    )
    .bind(reason)
    .bind(retry_at_ms)
    .bind(now_millis())
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to postpone bridge request {}", id))?;

    Ok(())
}

/// Return requests stranded in `processing` by an interrupted run to `pending`
pub async fn reset_interrupted_requests(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"UPDATE bridge_requests SET status = 'pending', updated_at = ?1
           WHERE status = 'processing'"#,
    )
    .bind(now_millis())
    .execute(pool)
    .await
    .wrap_err("Failed to reset interrupted bridge requests")?;

    Ok(result.rows_affected())
}

async fn update_status(pool: &SqlitePool, id: i64, status: RequestStatus) -> Result<()> {
    sqlx::query(r#"UPDATE bridge_requests SET status = ?1, updated_at = ?2 WHERE id = ?3"#)
        .bind(status.as_str())
        .bind(now_millis())
        .bind(id)
        .execute(pool)
        .await
        .wrap_err_with(|| format!("Failed to update bridge request {} status to {}", id, status))?;

    Ok(())
}

/// Get the last fully scanned block of a chain
pub async fn get_checkpoint(pool: &SqlitePool, chain_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as(r#"SELECT last_block FROM chain_checkpoints WHERE chain_id = ?1"#)
            .bind(chain_id)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to get chain checkpoint")?;

    Ok(row.map(|r| r.0))
}

/// Get the full checkpoint row of a chain
pub async fn get_checkpoint_row(pool: &SqlitePool, chain_id: i64) -> Result<Option<ChainCheckpoint>> {
    let row = sqlx::query_as::<_, ChainCheckpoint>(
        r#"SELECT chain_id, last_block, updated_at FROM chain_checkpoints WHERE chain_id = ?1"#,
    )
    .bind(chain_id)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to get chain checkpoint")?;

    Ok(row)
}

/// Advance the checkpoint of a chain. Never moves it backwards.
pub async fn save_checkpoint(pool: &SqlitePool, chain_id: i64, block_number: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chain_checkpoints (chain_id, last_block, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (chain_id) DO UPDATE SET
            last_block = MAX(chain_checkpoints.last_block, excluded.last_block),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(chain_id)
    .bind(block_number)
    .bind(now_millis())
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to save checkpoint for chain {}", chain_id))?;

    debug!(chain_id, block_number, "Checkpoint saved");
    Ok(())
}

/// Count requests by status
pub async fn get_stats(pool: &SqlitePool) -> Result<RequestStats> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as(r#"SELECT status, COUNT(*) FROM bridge_requests GROUP BY status"#)
            .fetch_all(pool)
            .await
            .wrap_err("Failed to count bridge requests by status")?;

    let mut stats = RequestStats::default();
    for (status, count) in rows {
        let status: RequestStatus = status.parse()?;
        stats.set(status, count);
    }
    Ok(stats)
}
