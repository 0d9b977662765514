//! Typed outcome of a failed release call
//!
//! Revert data is decoded once, here, into a closed set of variants so the
//! retry policy and the executor never inspect error text.

use alloy::sol_types::{decode_revert_reason, SolError};

use crate::contracts::IBridge;

/// Why a `releaseFunds` submission did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The destination already released this `(sourceChain, nonce)`
    #[error("nonce already processed")]
    AlreadyProcessed,
    /// The destination bridge cannot cover the amount right now
    #[error("insufficient liquidity on destination bridge")]
    InsufficientLiquidity,
    /// The signing key is not an authorized relayer
    #[error("caller is not an authorized relayer")]
    Unauthorized,
    /// Anything else: RPC failures, unknown reverts, receipt errors
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChainError::AlreadyProcessed | ChainError::Unauthorized)
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::AlreadyProcessed => "already_processed",
            ChainError::InsufficientLiquidity => "insufficient_liquidity",
            ChainError::Unauthorized => "unauthorized",
            ChainError::Other(_) => "other",
        }
    }
}

/// Classify revert data (custom error or `Error(string)`) and, when no data
/// is available, the node's revert message.
pub fn classify_revert(data: Option<&[u8]>, message: &str) -> ChainError {
    if let Some(data) = data {
        if let Some(selector) = data.get(..4) {
            if *selector == IBridge::NonceAlreadyProcessed::SELECTOR {
                return ChainError::AlreadyProcessed;
            }
            if *selector == IBridge::InsufficientLiquidity::SELECTOR {
                return ChainError::InsufficientLiquidity;
            }
            if *selector == IBridge::UnauthorizedRelayer::SELECTOR {
                return ChainError::Unauthorized;
            }
        }
        if let Some(reason) = decode_revert_reason(data) {
            return classify_reason(&reason).unwrap_or(ChainError::Other(reason));
        }
    }

    classify_reason(message).unwrap_or_else(|| ChainError::Other(message.to_string()))
}

/// Map a revert reason string that names one of the bridge's error identifiers
fn classify_reason(reason: &str) -> Option<ChainError> {
    if reason.contains("NonceAlreadyProcessed") {
        Some(ChainError::AlreadyProcessed)
    } else if reason.contains("InsufficientLiquidity") {
        Some(ChainError::InsufficientLiquidity)
    } else if reason.contains("UnauthorizedRelayer") {
        Some(ChainError::Unauthorized)
    } else {
        None
    }
}
