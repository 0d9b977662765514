//! Gas price selection for release transactions
//!
//! Network gas prices are cached per chain for a short TTL, padded by a
//! safety buffer and clamped to the chain's configured ceiling.

use eyre::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::chain::ChainHandle;

/// Gas limit for a single `releaseFunds` call
pub const RELEASE_GAS_LIMIT: u64 = 300_000;

/// How long a fetched gas price is reused
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Safety buffer applied on top of the network price, in percent
pub const GAS_PRICE_BUFFER_PERCENT: u128 = 20;

/// Gas settings for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    /// Legacy gas price in wei
    pub gas_price: u128,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    gas_price: u128,
    fetched_at: Instant,
}

/// Per-run gas price cache
#[derive(Debug)]
pub struct GasManager {
    ttl: Duration,
    cache: HashMap<u64, CachedPrice>,
}

impl Default for GasManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GasManager {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: HashMap::new(),
        }
    }

    /// Gas parameters for a release on `chain`
    pub async fn get_gas_params(&mut self, chain: &ChainHandle) -> Result<GasParams> {
        let chain_id = chain.chain_id();

        if let Some(cached) = self.cache.get(&chain_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                debug!(chain_id, gas_price = cached.gas_price, "Using cached gas price");
                return Ok(GasParams {
                    gas_price: cached.gas_price,
                    gas_limit: RELEASE_GAS_LIMIT,
                });
            }
        }

        let network_price = chain.client.gas_price().await?;
        let max_price = chain.config.max_gas_price_wei();
        let gas_price = apply_buffer_and_cap(network_price, max_price);

        if gas_price < with_buffer(network_price) {
            warn!(
                chain_id,
                chain_name = %chain.name(),
                network_gas_price = network_price,
                max_gas_price = max_price,
                "Gas price clamped to configured maximum"
            );
        } else {
            debug!(chain_id, network_gas_price = network_price, gas_price, "Fetched gas price");
        }

        self.cache.insert(
            chain_id,
            CachedPrice {
                gas_price,
                fetched_at: Instant::now(),
            },
        );

        Ok(GasParams {
            gas_price,
            gas_limit: RELEASE_GAS_LIMIT,
        })
    }
}

fn with_buffer(price: u128) -> u128 {
    price.saturating_mul(100 + GAS_PRICE_BUFFER_PERCENT) / 100
}

/// Buffered network price, never above `max_price`
pub fn apply_buffer_and_cap(network_price: u128, max_price: u128) -> u128 {
    with_buffer(network_price).min(max_price)
}
