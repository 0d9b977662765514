//! EVM bridge client
//!
//! Reads `BridgeInitiated` logs and the idempotency flag through a plain HTTP
//! provider, and submits `releaseFunds` through a wallet provider with the
//! recommended fillers (nonce, chain id). Gas price and gas limit are always
//! set explicitly from the gas manager.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, error, info};
use url::Url;

use super::{classify_revert, BridgeChain, BridgeEvent, ChainError, ReleaseCall};
use crate::config::ChainConfig;
use crate::contracts::IBridge;
use crate::gas::GasParams;
use crate::metrics;

/// alloy-backed [`BridgeChain`] for one EVM chain
pub struct EvmBridgeClient {
    name: String,
    chain_id: u64,
    rpc_url: Url,
    bridge_address: Address,
    signer: PrivateKeySigner,
    provider: RootProvider<Http<Client>>,
}

impl EvmBridgeClient {
    /// Create a client for a configured chain
    pub fn new(config: &ChainConfig, private_key: &str) -> Result<Self> {
        let rpc_url: Url = config.rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());

        let bridge_address =
            Address::from_str(&config.bridge_address).wrap_err("Invalid bridge address")?;
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;

        info!(
            chain_name = %config.name,
            chain_id = config.chain_id,
            bridge_address = %bridge_address,
            relayer_address = %signer.address(),
            "EVM bridge client initialized"
        );

        Ok(Self {
            name: config.name.clone(),
            chain_id: config.chain_id,
            rpc_url,
            bridge_address,
            signer,
            provider,
        })
    }

    fn parse_release_args(call: &ReleaseCall) -> Result<(Address, Address, U256), ChainError> {
        let token = Address::from_str(&call.token)
            .map_err(|e| ChainError::Other(format!("Invalid token address {}: {}", call.token, e)))?;
        let recipient = Address::from_str(&call.recipient).map_err(|e| {
            ChainError::Other(format!("Invalid recipient address {}: {}", call.recipient, e))
        })?;
        let amount = U256::from_str(&call.amount)
            .map_err(|e| ChainError::Other(format!("Invalid amount {}: {}", call.amount, e)))?;
        Ok((token, recipient, amount))
    }
}

#[async_trait]
impl BridgeChain for EvmBridgeClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("Failed to get block number on {}", self.name))
    }

    async fn bridge_events(&self, from_block: u64, to_block: u64) -> Result<Vec<BridgeEvent>> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .event_signature(IBridge::BridgeInitiated::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("Failed to get logs {}..={} on {}", from_block, to_block, self.name))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match decode_bridge_log(&log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    error!(
                        chain_id = self.chain_id,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Failed to parse BridgeInitiated log, skipping it"
                    );
                    metrics::record_event_rejected(&self.name, "decode");
                }
            }
        }
        Ok(events)
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .wrap_err_with(|| format!("Failed to get gas price on {}", self.name))
    }

    async fn is_nonce_processed(&self, source_chain: u64, nonce: u64) -> Result<bool> {
        let bridge = IBridge::new(self.bridge_address, &self.provider);
        let processed = bridge
            .isNonceProcessed(U256::from(source_chain), U256::from(nonce))
            .call()
            .await
            .wrap_err_with(|| format!("isNonceProcessed({}, {}) failed", source_chain, nonce))?;
        Ok(processed._0)
    }

    async fn release_funds(
        &self,
        call: &ReleaseCall,
        gas: &GasParams,
    ) -> std::result::Result<String, ChainError> {
        let (token, recipient, amount) = Self::parse_release_args(call)?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());
        let bridge = IBridge::new(self.bridge_address, &provider);

        let release = bridge
            .releaseFunds(
                U256::from(call.nonce),
                U256::from(call.source_chain),
                token,
                recipient,
                amount,
            )
            .from(self.signer.address())
            .gas(gas.gas_limit)
            .gas_price(gas.gas_price);

        // Simulate first so a revert comes back with its reason instead of
        // as a mined failure.
        release.call().await.map_err(classify_contract_error)?;

        debug!(
            chain_id = self.chain_id,
            source_chain = call.source_chain,
            nonce = call.nonce,
            token = %token,
            recipient = %recipient,
            amount = %amount,
            gas_price = gas.gas_price,
            gas_limit = gas.gas_limit,
            "Submitting releaseFunds"
        );

        let pending_tx = release.send().await.map_err(classify_contract_error)?;
        let tx_hash = *pending_tx.tx_hash();
        info!(tx_hash = %tx_hash, "Release transaction sent, waiting for confirmation");

        let receipt = pending_tx
            .with_required_confirmations(1)
            .get_receipt()
            .await
            .map_err(|e| ChainError::Other(format!("Failed to get receipt for {}: {}", tx_hash, e)))?;

        if !receipt.status() {
            return Err(ChainError::Other(format!(
                "Release transaction 0x{:x} reverted",
                tx_hash
            )));
        }

        Ok(format!("0x{:x}", tx_hash))
    }
}

/// Decode a raw log into a [`BridgeEvent`]
fn decode_bridge_log(log: &Log) -> Result<BridgeEvent> {
    let decoded = log
        .log_decode::<IBridge::BridgeInitiated>()
        .wrap_err("Failed to decode BridgeInitiated log")?;
    let event = &decoded.inner.data;

    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| eyre!("Missing transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or_else(|| eyre!("Missing block number"))?;

    Ok(BridgeEvent {
        nonce: to_u64(event.nonce, "nonce")?,
        token: event.token.to_string(),
        sender: event.sender.to_string(),
        recipient: event.recipient.to_string(),
        source_chain: to_u64(event.sourceChain, "sourceChain")?,
        dest_chain: to_u64(event.destChain, "destChain")?,
        amount: event.amount.to_string(),
        bridge_fee: event.bridgeFee.to_string(),
        protocol_fee: event.protocolFee.to_string(),
        timestamp: to_u64(event.timestamp, "timestamp")?,
        block_number,
        tx_hash: format!("0x{:x}", tx_hash),
    })
}

fn to_u64(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| eyre!("{} {} does not fit in u64", field, value))
}

/// Turn a contract call error into a [`ChainError`], decoding revert data
/// from the JSON-RPC error payload when the node returned one.
fn classify_contract_error(err: alloy::contract::Error) -> ChainError {
    if let alloy::contract::Error::TransportError(rpc_err) = &err {
        if let Some(payload) = rpc_err.as_error_resp() {
            let data = payload.as_revert_data();
            return classify_revert(data.as_ref().map(|bytes| &bytes[..]), &payload.message);
        }
    }
    classify_revert(None, &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_u64_bounds() {
        assert_eq!(to_u64(U256::from(7u64), "nonce").unwrap(), 7);
        assert!(to_u64(U256::MAX, "nonce").is_err());
    }

    fn bridge_log(nonce: U256, dest_chain: u64) -> Log {
        let event = IBridge::BridgeInitiated {
            nonce,
            token: Address::with_last_byte(0xaa),
            sender: Address::with_last_byte(0xbb),
            recipient: Address::with_last_byte(0xcc),
            sourceChain: U256::from(1u64),
            destChain: U256::from(dest_chain),
            amount: U256::from(500u64),
            bridgeFee: U256::ZERO,
            protocolFee: U256::ZERO,
            timestamp: U256::from(1_700_000_000u64),
        };
        Log {
            inner: alloy::primitives::Log {
                address: Address::with_last_byte(1),
                data: event.encode_log_data(),
            },
            block_number: Some(950),
            transaction_hash: Some(alloy::primitives::B256::with_last_byte(9)),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_bridge_log() {
        let event = decode_bridge_log(&bridge_log(U256::from(7u64), 137)).unwrap();
        assert_eq!(event.nonce, 7);
        assert_eq!(event.source_chain, 1);
        assert_eq!(event.dest_chain, 137);
        assert_eq!(event.amount, "500");
        assert_eq!(event.block_number, 950);
        assert_eq!(event.recipient, Address::with_last_byte(0xcc).to_string());
    }

    #[test]
    fn test_decode_rejects_oversized_fields() {
        assert!(decode_bridge_log(&bridge_log(U256::MAX, 137)).is_err());

        let mut log = bridge_log(U256::from(7u64), 137);
        log.block_number = None;
        assert!(decode_bridge_log(&log).is_err());
    }

    #[test]
    fn test_release_args_parsing() {
        let call = ReleaseCall {
            nonce: 7,
            source_chain: 1,
            token: "0x0000000000000000000000000000000000000001".to_string(),
            recipient: "0x0000000000000000000000000000000000000002".to_string(),
            amount: "500".to_string(),
        };
        let (token, recipient, amount) = EvmBridgeClient::parse_release_args(&call).unwrap();
        assert_eq!(token, Address::with_last_byte(1));
        assert_eq!(recipient, Address::with_last_byte(2));
        assert_eq!(amount, U256::from(500));

        let bad = ReleaseCall {
            amount: "not-a-number".to_string(),
            ..call
        };
        assert!(matches!(
            EvmBridgeClient::parse_release_args(&bad),
            Err(ChainError::Other(_))
        ));
    }

    #[test]
    fn test_event_signature_matches_abi() {
        assert_eq!(
            IBridge::BridgeInitiated::SIGNATURE,
            "BridgeInitiated(uint256,address,address,address,uint256,uint256,uint256,uint256,uint256,uint256)"
        );
    }
}
