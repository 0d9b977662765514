//! Batch relayer for the bridge
//!
//! Each invocation takes a process lease, scans the configured chains for
//! `BridgeInitiated` events, stores them as pending requests, and submits
//! `releaseFunds` on the destination chain for a batch of pending requests.

pub mod chain;
pub mod config;
pub mod contracts;
pub mod db;
pub mod executor;
pub mod gas;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod scanner;
pub mod types;
