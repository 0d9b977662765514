//! Persistent store invariants against a real SQLite file

mod common;

use bridge_relayer::db;
use bridge_relayer::types::{now_millis, RequestStatus};
use common::{new_request, test_db};

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_insert_is_idempotent() {
    let (_dir, _path, pool) = test_db().await;
    let request = new_request(1, 137, 7);

    assert!(db::insert_bridge_request(&pool, &request).await.unwrap());
    assert!(!db::insert_bridge_request(&pool, &request).await.unwrap());

    // Same nonce from a different source chain is a different request
    assert!(db::insert_bridge_request(&pool, &new_request(56, 137, 7)).await.unwrap());

    let stats = db::get_stats(&pool).await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.total(), 2);
}

#[tokio::test]
async fn test_new_request_defaults() {
    let (_dir, _path, pool) = test_db().await;
    db::insert_bridge_request(&pool, &new_request(1, 137, 7)).await.unwrap();

    let row = db::get_request(&pool, 1, 7).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.amount, "500");
    assert!(row.dest_tx_hash.is_none());
    assert!(row.last_error.is_none());
    assert!(row.next_attempt_at.is_none());
    assert_eq!(row.created_at, row.updated_at);

    assert!(db::get_request(&pool, 1, 8).await.unwrap().is_none());
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_dir, _path, pool) = test_db().await;
    db::run_migrations(&pool).await.unwrap();
}

// ============================================================================
// Checkpoints
// ============================================================================

#[tokio::test]
async fn test_checkpoint_is_monotonic() {
    let (_dir, _path, pool) = test_db().await;
    assert_eq!(db::get_checkpoint(&pool, 1).await.unwrap(), None);

    db::save_checkpoint(&pool, 1, 100).await.unwrap();
    assert_eq!(db::get_checkpoint(&pool, 1).await.unwrap(), Some(100));

    db::save_checkpoint(&pool, 1, 250).await.unwrap();
    db::save_checkpoint(&pool, 1, 120).await.unwrap();
    assert_eq!(db::get_checkpoint(&pool, 1).await.unwrap(), Some(250));

    let row = db::get_checkpoint_row(&pool, 1).await.unwrap().unwrap();
    assert_eq!(row.last_block, 250);

    // Chains are independent
    assert_eq!(db::get_checkpoint(&pool, 137).await.unwrap(), None);
}

// ============================================================================
// Pending selection
// ============================================================================

#[tokio::test]
async fn test_pending_requests_oldest_first() {
    let (_dir, _path, pool) = test_db().await;
    for nonce in [3, 1, 2] {
        db::insert_bridge_request(&pool, &new_request(1, 137, nonce)).await.unwrap();
    }

    let pending = db::get_pending_requests(&pool, 10, now_millis()).await.unwrap();
    let nonces: Vec<i64> = pending.iter().map(|r| r.nonce).collect();
    assert_eq!(nonces, vec![3, 1, 2]);

    let limited = db::get_pending_requests(&pool, 2, now_millis()).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_retry_exhaustion_excludes_request() {
    let (_dir, _path, pool) = test_db().await;
    db::insert_bridge_request(&pool, &new_request(1, 137, 7)).await.unwrap();
    let id = db::get_request(&pool, 1, 7).await.unwrap().unwrap().id;

    for attempt in 1..=4 {
        db::mark_failed(&pool, id, "execution reverted").await.unwrap();
        let pending = db::get_pending_requests(&pool, 10, now_millis()).await.unwrap();
        assert_eq!(pending.len(), 1, "still eligible after {} failures", attempt);
        assert_eq!(pending[0].status, RequestStatus::Failed);
    }

    db::mark_failed(&pool, id, "execution reverted").await.unwrap();
    assert!(db::get_pending_requests(&pool, 10, now_millis()).await.unwrap().is_empty());

    let row = db::get_request(&pool, 1, 7).await.unwrap().unwrap();
    assert_eq!(row.retry_count, db::MAX_RETRY_COUNT);
    assert_eq!(row.last_error.as_deref(), Some("execution reverted"));
}

#[tokio::test]
async fn test_pending_with_exhausted_retries_is_excluded() {
    let (_dir, _path, pool) = test_db().await;
    db::insert_bridge_request(&pool, &new_request(1, 137, 7)).await.unwrap();
    sqlx::query("UPDATE bridge_requests SET retry_count = 5, status = 'pending'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(db::get_pending_requests(&pool, 10, now_millis()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_and_processing_rows_excluded() {
    let (_dir, _path, pool) = test_db().await;
    for nonce in 1..=3 {
        db::insert_bridge_request(&pool, &new_request(1, 137, nonce)).await.unwrap();
    }
    let id = |nonce| {
        let pool = pool.clone();
        async move { db::get_request(&pool, 1, nonce).await.unwrap().unwrap().id }
    };

    db::mark_completed(&pool, id(1).await, "0xdead").await.unwrap();
    db::mark_skipped(&pool, id(2).await).await.unwrap();
    db::mark_processing(&pool, id(3).await).await.unwrap();

    assert!(db::get_pending_requests(&pool, 10, now_millis()).await.unwrap().is_empty());

    let completed = db::get_request(&pool, 1, 1).await.unwrap().unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(completed.dest_tx_hash.as_deref(), Some("0xdead"));

    let stats = db::get_stats(&pool).await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_deferred_request_waits_for_backoff() {
    let (_dir, _path, pool) = test_db().await;
    db::insert_bridge_request(&pool, &new_request(1, 137, 7)).await.unwrap();
    let id = db::get_request(&pool, 1, 7).await.unwrap().unwrap().id;

    let now = now_millis();
    db::mark_processing(&pool, id).await.unwrap();
    db::defer_request(&pool, id, "insufficient liquidity", now + 60_000)
        .await
        .unwrap();

    let row = db::get_request(&pool, 1, 7).await.unwrap().unwrap();
    assert_eq!(row.status, RequestStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.next_attempt_at, Some(now + 60_000));

    assert!(db::get_pending_requests(&pool, 10, now).await.unwrap().is_empty());
    assert_eq!(
        db::get_pending_requests(&pool, 10, now + 60_000).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_reset_interrupted_requests() {
    let (_dir, _path, pool) = test_db().await;
    db::insert_bridge_request(&pool, &new_request(1, 137, 7)).await.unwrap();
    db::insert_bridge_request(&pool, &new_request(1, 137, 8)).await.unwrap();
    let id = db::get_request(&pool, 1, 7).await.unwrap().unwrap().id;
    db::mark_processing(&pool, id).await.unwrap();

    assert_eq!(db::reset_interrupted_requests(&pool).await.unwrap(), 1);
    assert_eq!(db::reset_interrupted_requests(&pool).await.unwrap(), 0);

    let stats = db::get_stats(&pool).await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let (_dir, path, pool) = test_db().await;
    db::insert_bridge_request(&pool, &new_request(1, 137, 7)).await.unwrap();
    db::save_checkpoint(&pool, 1, 42).await.unwrap();
    pool.close().await;

    let pool = db::create_pool(&path).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    assert_eq!(db::get_checkpoint(&pool, 1).await.unwrap(), Some(42));
    assert!(db::get_request(&pool, 1, 7).await.unwrap().is_some());
}
