//! Nomination-pool and staking migration jobs
//!
//! One-shot batch jobs against a Substrate node: enumerate a storage
//! collection at a pinned block, classify every key, and submit the needed
//! migration calls in rate-limited, signer-rotated batches.

pub mod census;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod migration;
pub mod wallet;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
