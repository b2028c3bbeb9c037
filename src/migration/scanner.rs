//! Migration scanner
//!
//! Walks the keys of one collection in snapshot order, classifies every key
//! into exactly one outcome and hands the resulting operations to the
//! dispatcher.
//!
//! Classification priority is fixed:
//!
//! ```text
//! balance low? ──yes──► BalanceLow
//!      │no
//! staking directly? ──yes──► AlreadyStaking
//!      │no
//! needs migration? ──yes──► NeedsMigration
//!      │no
//!      └──────────────────► AlreadyMigrated
//! ```
//!
//! Pending slash is a separate flag evaluated for every key.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, Collection, Key, Operation};
use crate::error::Result;

use super::dispatcher::BatchDispatcher;
use super::progress::ProgressReporter;

/// Primary bucket of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NeedsMigration,
    AlreadyMigrated,
    BalanceLow,
    AlreadyStaking,
}

/// Result of classifying one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    pub pending_slash: bool,
}

/// Counters of one scan phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanState {
    pub to_migrate: u64,
    pub already_migrated: u64,
    pub balance_low: u64,
    pub already_staking: u64,
    pub pending_slash: u64,
    pub processed: u64,
    pub total: u64,
}

impl ScanState {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, classification: &Classification) {
        match classification.outcome {
            Outcome::NeedsMigration => self.to_migrate += 1,
            Outcome::AlreadyMigrated => self.already_migrated += 1,
            Outcome::BalanceLow => self.balance_low += 1,
            Outcome::AlreadyStaking => self.already_staking += 1,
        }
        if classification.pending_slash {
            self.pending_slash += 1;
        }
        self.processed += 1;
    }

    /// Sum of the disjoint buckets; equals `processed`
    pub fn bucket_sum(&self) -> u64 {
        self.to_migrate + self.already_migrated + self.balance_low + self.already_staking
    }

    pub fn counters(&self) -> String {
        format!(
            "to migrate: {}, migrated: {}, balance low: {}, staking: {}, pending slash: {}",
            self.to_migrate,
            self.already_migrated,
            self.balance_low,
            self.already_staking,
            self.pending_slash
        )
    }
}

/// Per-key predicates and operations of one migration kind
///
/// Predicates a kind does not have default to `false`.
#[async_trait]
pub trait MigrationCheck: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &'static str;

    /// Collection whose keys are scanned
    fn collection(&self) -> Collection;

    async fn is_balance_low(&self, _key: &Key) -> Result<bool> {
        Ok(false)
    }

    async fn is_staking_directly(&self, _key: &Key) -> Result<bool> {
        Ok(false)
    }

    async fn needs_migration(&self, key: &Key) -> Result<bool>;

    async fn has_pending_slash(&self, _key: &Key) -> Result<bool> {
        Ok(false)
    }

    /// Operation that migrates `key`
    fn migration(&self, key: &Key) -> Result<Operation>;

    /// Operation that applies a pending slash, if this kind has one
    fn slash(&self, _key: &Key) -> Result<Option<Operation>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Classify and count only
    pub dry_run: bool,
    /// Skip this many keys of the snapshot
    pub start_from: usize,
}

pub struct MigrationScanner {
    options: ScanOptions,
    progress: ProgressReporter,
}

impl MigrationScanner {
    pub fn new(options: ScanOptions, progress: ProgressReporter) -> Self {
        Self { options, progress }
    }

    /// Classify every key from `start_from` on and queue what needs doing
    ///
    /// Connectivity failures and funding shortfalls abort the scan. Other
    /// lookup failures only affect the key they happened on.
    pub async fn scan<C, M>(
        &self,
        check: &M,
        keys: &[Key],
        dispatcher: &mut BatchDispatcher<'_, C>,
    ) -> Result<ScanState>
    where
        C: ChainClient + ?Sized,
        M: MigrationCheck + ?Sized,
    {
        let skip = self.options.start_from.min(keys.len());
        let mut state = ScanState::new((keys.len() - skip) as u64);

        info!(
            "Scanning {} of {} {} keys (start_from {}){}",
            state.total,
            keys.len(),
            check.name(),
            self.options.start_from,
            if self.options.dry_run { " [DRY-RUN]" } else { "" }
        );

        for key in &keys[skip..] {
            let classification = self.classify(check, key).await?;
            state.record(&classification);
            debug!("{} {}: {:?}", check.name(), key, classification);

            if classification.outcome == Outcome::NeedsMigration {
                dispatcher.record_migration();
                let operation = check.migration(key)?;
                if self.options.dry_run {
                    info!("DRY-RUN: {} needs migration, would queue {}", key, operation);
                } else {
                    dispatcher.enqueue(operation).await?;
                }
            }

            if classification.pending_slash {
                if let Some(operation) = check.slash(key)? {
                    if self.options.dry_run {
                        info!("DRY-RUN: {} has a pending slash, would queue {}", key, operation);
                    } else {
                        dispatcher.enqueue(operation).await?;
                    }
                }
            }

            self.progress
                .report(state.processed, state.total, &state.counters(), false);
        }

        self.progress
            .report(state.processed, state.total, &state.counters(), true);
        self.progress.finish();

        Ok(state)
    }

    /// Classify one key
    pub async fn classify<M>(&self, check: &M, key: &Key) -> Result<Classification>
    where
        M: MigrationCheck + ?Sized,
    {
        let outcome = if fail_open(check.is_balance_low(key).await, "balance", key)? {
            Outcome::BalanceLow
        } else if fail_open(check.is_staking_directly(key).await, "staking", key)? {
            Outcome::AlreadyStaking
        } else if fail_open(check.needs_migration(key).await, "migration", key)? {
            Outcome::NeedsMigration
        } else {
            Outcome::AlreadyMigrated
        };

        let pending_slash = fail_open(check.has_pending_slash(key).await, "slash", key)?;

        Ok(Classification {
            outcome,
            pending_slash,
        })
    }
}

/// Treat a failed lookup as `false` unless the node is gone
fn fail_open(result: Result<bool>, lookup: &str, key: &Key) -> Result<bool> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_connectivity() => Err(e),
        Err(e) => {
            warn!("{} check failed for {}, assuming false: {}", lookup, key, e);
            Ok(false)
        }
    }
}
