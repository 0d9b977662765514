//! Contract ABI definitions for interacting with bridge contracts

pub mod bridge;

pub use bridge::IBridge;
