//! Bridge contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge contract.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Bridge contract interface used by the relayer
    #[sol(rpc)]
    interface IBridge {
        /// Emitted on the source chain when a user locks funds for bridging
        event BridgeInitiated(
            uint256 indexed nonce,
            address indexed token,
            address indexed sender,
            address recipient,
            uint256 sourceChain,
            uint256 destChain,
            uint256 amount,
            uint256 bridgeFee,
            uint256 protocolFee,
            uint256 timestamp
        );

        /// Pay out a bridged transfer on the destination chain.
        /// Only callable by an authorized relayer.
        function releaseFunds(
            uint256 nonce,
            uint256 sourceChain,
            address token,
            address recipient,
            uint256 amount
        ) external;

        /// Whether `(sourceChain, nonce)` has already been released
        function isNonceProcessed(uint256 sourceChain, uint256 nonce) external view returns (bool);

        error NonceAlreadyProcessed(uint256 sourceChain, uint256 nonce);
        error InsufficientLiquidity(address token, uint256 requested, uint256 available);
        error UnauthorizedRelayer(address caller);
    }
}
