//! Chain interaction boundary
//!
//! Everything the scanner and executor need from a chain goes through the
//! [`BridgeChain`] trait so the pipeline can run against fakes in tests.

use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::gas::GasParams;

pub mod error;
pub mod evm;

pub use error::{classify_revert, ChainError};
pub use evm::EvmBridgeClient;

/// A decoded `BridgeInitiated` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub nonce: u64,
    pub token: String,
    pub sender: String,
    pub recipient: String,
    pub source_chain: u64,
    pub dest_chain: u64,
    /// Decimal string
    pub amount: String,
    pub bridge_fee: String,
    pub protocol_fee: String,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: String,
}

/// Arguments of a `releaseFunds` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCall {
    pub nonce: u64,
    pub source_chain: u64,
    pub token: String,
    pub recipient: String,
    /// Decimal string
    pub amount: String,
}

/// Read and write access to one chain's bridge contract
#[async_trait]
pub trait BridgeChain: Send + Sync {
    /// Native chain id this client talks to
    fn chain_id(&self) -> u64;

    /// Current head block number
    async fn block_number(&self) -> Result<u64>;

    /// `BridgeInitiated` events in `[from_block, to_block]`, in log order
    async fn bridge_events(&self, from_block: u64, to_block: u64) -> Result<Vec<BridgeEvent>>;

    /// Current network gas price in wei
    async fn gas_price(&self) -> Result<u128>;

    /// The bridge's idempotency oracle
    async fn is_nonce_processed(&self, source_chain: u64, nonce: u64) -> Result<bool>;

    /// Submit `releaseFunds` and wait for one confirmation.
    /// Returns the transaction hash.
    async fn release_funds(
        &self,
        call: &ReleaseCall,
        gas: &GasParams,
    ) -> std::result::Result<String, ChainError>;
}

/// A configured chain together with its client
#[derive(Clone)]
pub struct ChainHandle {
    pub config: ChainConfig,
    pub client: Arc<dyn BridgeChain>,
}

impl ChainHandle {
    pub fn new(config: ChainConfig, client: Arc<dyn BridgeChain>) -> Self {
        Self { config, client }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Chains in configuration order, looked up by native chain id
#[derive(Clone, Default)]
pub struct ChainSet {
    chains: Vec<ChainHandle>,
}

impl ChainSet {
    pub fn new(chains: Vec<ChainHandle>) -> Self {
        Self { chains }
    }

    pub fn push(&mut self, handle: ChainHandle) {
        self.chains.push(handle);
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainHandle> {
        self.chains.iter().find(|c| c.chain_id() == chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainHandle> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Build alloy clients for every enabled chain. A chain whose client cannot
/// be constructed is logged and left out; the rest still run.
pub fn connect_all(chains: &[ChainConfig], private_key: &str) -> ChainSet {
    let mut set = ChainSet::default();
    for chain in chains.iter().filter(|c| c.enabled) {
        match EvmBridgeClient::new(chain, private_key) {
            Ok(client) => set.push(ChainHandle::new(chain.clone(), Arc::new(client))),
            Err(e) => {
                tracing::error!(
                    chain_name = %chain.name,
                    chain_id = chain.chain_id,
                    error = %e,
                    "Failed to create chain client, chain will be skipped this run"
                );
            }
        }
    }
    set
}
