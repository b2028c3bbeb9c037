//! Batch dispatcher
//!
//! Collects operations until the batch is full, then signs it with the
//! signer the rotation counter points at and submits it as one transaction.
//! Enqueue blocks through the flush and its delay, so the scan never runs
//! ahead of submission.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::chain::{Balance, ChainClient, Operation};
use crate::error::{Error, Result};
use crate::wallet::keyring::SignerPool;

/// Dispatch parameters
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum operations per transaction
    pub batch_size: usize,
    /// Pause after every flush
    pub delay: Duration,
    /// Signers below this balance stop the job
    pub min_signer_balance: Balance,
    /// Submit a non-empty leftover queue on `finish`
    pub flush_remainder: bool,
}

/// Running dispatch totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Submission attempts
    pub flushes: u64,
    /// Operations included in accepted transactions
    pub submitted_operations: u64,
    /// Transactions the node rejected
    pub failed_batches: u64,
    /// Operations discarded at `finish`
    pub dropped_operations: u64,
}

/// Queue of pending operations in front of the chain
pub struct BatchDispatcher<'a, C: ChainClient + ?Sized> {
    chain: &'a C,
    pool: &'a SignerPool,
    settings: DispatchSettings,
    pending: Vec<Operation>,
    rotation: u64,
    stats: DispatchStats,
}

impl<'a, C: ChainClient + ?Sized> BatchDispatcher<'a, C> {
    pub fn new(chain: &'a C, pool: &'a SignerPool, settings: DispatchSettings) -> Self {
        let capacity = settings.batch_size.max(1);
        Self {
            chain,
            pool,
            settings,
            pending: Vec::with_capacity(capacity),
            rotation: 0,
            stats: DispatchStats::default(),
        }
    }

    /// Count one key classified as needing migration
    ///
    /// The counter outlives phases, so a job that scans pools then members
    /// keeps rotating where the first phase stopped.
    pub fn record_migration(&mut self) {
        self.rotation += 1;
    }

    pub fn rotation(&self) -> u64 {
        self.rotation
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Queue an operation, flushing once the batch is full
    pub async fn enqueue(&mut self, operation: Operation) -> Result<()> {
        self.pending.push(operation);
        if self.pending.len() >= self.settings.batch_size.max(1) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Submit everything pending as one transaction
    ///
    /// Only a funding shortfall (or an unreadable signer balance) is returned
    /// as an error. A rejected transaction is logged and its operations are
    /// dropped.
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let signer = self.pool.select(self.rotation, self.settings.batch_size);
        let balance = self.chain.account(signer.account()).await?.free;
        if balance < self.settings.min_signer_balance {
            error!(
                "Signer {} (seed {:?}) has {} but needs at least {}; stopping",
                signer.address(),
                signer.seed(),
                balance,
                self.settings.min_signer_balance
            );
            return Err(Error::FundingShortfall {
                address: signer.address(),
                balance,
                required: self.settings.min_signer_balance,
            });
        }

        let operations = std::mem::take(&mut self.pending);
        self.stats.flushes += 1;

        let result = if operations.len() == 1 {
            self.chain.submit(&operations[0], signer).await
        } else {
            self.chain.submit_batch(&operations, signer).await
        };

        match result {
            Ok(hash) => {
                self.stats.submitted_operations += operations.len() as u64;
                info!(
                    "Submitted {} operation(s) with signer {} (seed {:?}): {:?}",
                    operations.len(),
                    signer.address(),
                    signer.seed(),
                    hash
                );
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                warn!(
                    "Batch of {} operation(s) failed, continuing: {}",
                    operations.len(),
                    e
                );
            }
        }

        tokio::time::sleep(self.settings.delay).await;
        Ok(())
    }

    /// Handle the last partial batch of a phase
    pub async fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        if self.settings.flush_remainder {
            info!("Flushing final batch of {} operation(s)", self.pending.len());
            self.flush().await
        } else {
            let dropped = self.pending.len();
            warn!(
                "Dropping {} queued operation(s) below the batch size (flush_remainder = false)",
                dropped
            );
            self.pending.clear();
            self.stats.dropped_operations += dropped as u64;
            Ok(())
        }
    }
}
