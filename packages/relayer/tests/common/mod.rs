//! Shared helpers for the relayer integration tests
//!
//! `FakeChain` is an in-process `BridgeChain` with a settable head, a log of
//! emitted events, a scripted gas price and scripted release results.

#![allow(dead_code)]

use async_trait::async_trait;
use eyre::{eyre, Result};
use sqlx::SqlitePool;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use bridge_relayer::chain::{BridgeChain, BridgeEvent, ChainError, ChainHandle, ChainSet, ReleaseCall};
use bridge_relayer::config::{ChainConfig, Config, DatabaseConfig, RelayerConfig, RetrySettings};
use bridge_relayer::db::{self, NewBridgeRequest};
use bridge_relayer::executor::{ExecutorSettings, RetryConfig};
use bridge_relayer::gas::GasParams;

pub const TOKEN: &str = "0x00000000000000000000000000000000000000aa";
pub const SENDER: &str = "0x00000000000000000000000000000000000000bb";
pub const RECIPIENT: &str = "0x00000000000000000000000000000000000000cc";
pub const GWEI: u128 = 1_000_000_000;

#[derive(Default)]
struct FakeState {
    head: u64,
    events: Vec<BridgeEvent>,
    gas_price: u128,
    gas_price_calls: usize,
    processed: HashSet<(u64, u64)>,
    release_script: VecDeque<std::result::Result<String, ChainError>>,
    releases: Vec<(ReleaseCall, GasParams)>,
    fail_reads: bool,
}

/// In-memory bridge chain
pub struct FakeChain {
    chain_id: u64,
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            state: Mutex::new(FakeState {
                gas_price: 10 * GWEI,
                ..FakeState::default()
            }),
        })
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn emit(&self, event: BridgeEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state.lock().unwrap().gas_price = wei;
    }

    pub fn gas_price_calls(&self) -> usize {
        self.state.lock().unwrap().gas_price_calls
    }

    pub fn mark_processed(&self, source_chain: u64, nonce: u64) {
        self.state
            .lock()
            .unwrap()
            .processed
            .insert((source_chain, nonce));
    }

    /// Queue the result of the next `release_funds` call. Unscripted calls
    /// succeed.
    pub fn script_release(&self, result: std::result::Result<String, ChainError>) {
        self.state.lock().unwrap().release_script.push_back(result);
    }

    pub fn releases(&self) -> Vec<(ReleaseCall, GasParams)> {
        self.state.lock().unwrap().releases.clone()
    }

    /// Make every read RPC fail
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }
}

#[async_trait]
impl BridgeChain for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("connection refused"));
        }
        Ok(state.head)
    }

    async fn bridge_events(&self, from_block: u64, to_block: u64) -> Result<Vec<BridgeEvent>> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("connection refused"));
        }
        Ok(state
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn gas_price(&self) -> Result<u128> {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("connection refused"));
        }
        state.gas_price_calls += 1;
        Ok(state.gas_price)
    }

    async fn is_nonce_processed(&self, source_chain: u64, nonce: u64) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(eyre!("connection refused"));
        }
        Ok(state.processed.contains(&(source_chain, nonce)))
    }

    async fn release_funds(
        &self,
        call: &ReleaseCall,
        gas: &GasParams,
    ) -> std::result::Result<String, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.releases.push((call.clone(), *gas));
        let result = state
            .release_script
            .pop_front()
            .unwrap_or_else(|| Ok(format!("0x{:064x}", state.releases.len())));
        if result.is_ok() {
            state.processed.insert((call.source_chain, call.nonce));
        }
        result
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn chain_config(chain_id: u64) -> ChainConfig {
    ChainConfig {
        name: format!("chain-{}", chain_id),
        chain_id,
        rpc_url: "http://localhost:8545".to_string(),
        bridge_address: "0x0000000000000000000000000000000000000001".to_string(),
        confirmations: 12,
        max_block_range: 2000,
        max_gas_price_gwei: 200,
        start_block: None,
        enabled: true,
    }
}

pub fn handle(config: ChainConfig, chain: &Arc<FakeChain>) -> ChainHandle {
    ChainHandle::new(config, chain.clone())
}

pub fn chain_set(handles: Vec<ChainHandle>) -> ChainSet {
    ChainSet::new(handles)
}

pub fn event(source_chain: u64, dest_chain: u64, nonce: u64, block_number: u64) -> BridgeEvent {
    BridgeEvent {
        nonce,
        token: TOKEN.to_string(),
        sender: SENDER.to_string(),
        recipient: RECIPIENT.to_string(),
        source_chain,
        dest_chain,
        amount: "500".to_string(),
        bridge_fee: "0".to_string(),
        protocol_fee: "0".to_string(),
        timestamp: 1_700_000_000,
        block_number,
        tx_hash: format!("0x{:064x}", block_number * 1000 + nonce),
    }
}

pub fn new_request(source_chain: i64, dest_chain: i64, nonce: i64) -> NewBridgeRequest {
    NewBridgeRequest {
        source_chain,
        dest_chain,
        nonce,
        token: TOKEN.to_string(),
        sender: SENDER.to_string(),
        recipient: RECIPIENT.to_string(),
        amount: "500".to_string(),
        source_block_number: 100,
        source_tx_hash: format!("0x{:064x}", nonce),
    }
}

/// Retry settings with millisecond delays and no jitter
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter_ratio: 0.0,
    }
}

pub fn executor_settings() -> ExecutorSettings {
    ExecutorSettings {
        dry_run: false,
        liquidity_backoff: Duration::from_secs(300),
        unavailable_backoff: Duration::from_secs(60),
        retry: fast_retry(),
    }
}

pub fn relayer_config(db_path: PathBuf, chains: Vec<ChainConfig>) -> Config {
    Config {
        database: DatabaseConfig { path: db_path },
        relayer: RelayerConfig {
            private_key: format!("0x{}", "11".repeat(32)),
            dry_run: false,
            batch_size: 50,
            liquidity_backoff_secs: 300,
            unavailable_backoff_secs: 60,
            metrics_textfile: None,
        },
        retry: RetrySettings {
            attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        chains,
    }
}

// ============================================================================
// Store
// ============================================================================

/// A migrated database in a fresh temp directory. Keep the `TempDir` alive
/// for the duration of the test.
pub async fn test_db() -> (TempDir, PathBuf, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relayer.db");
    let pool = db::create_pool(&path).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, path, pool)
}
