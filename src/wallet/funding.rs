//! Signer funding
//!
//! Tops signers up from the admin account before a real run, and sweeps
//! their balances back afterwards. Every transfer is signed by the account
//! that pays, so consecutive transfers from the same account are spaced by
//! the top-up delay to let the previous one land.

use std::time::Duration;
use tracing::{debug, info};

use crate::chain::{Balance, ChainClient, Operation};
use crate::config::SignersConfig;
use crate::error::Result;

use super::keyring::{Identity, SignerPool};

/// Funding parameters
#[derive(Debug, Clone)]
pub struct FundingSettings {
    /// Balance every signer is topped up to
    pub topup_balance: Balance,
    /// Pause after each transfer
    pub delay: Duration,
}

impl From<&SignersConfig> for FundingSettings {
    fn from(config: &SignersConfig) -> Self {
        Self {
            topup_balance: Balance::from(config.topup_balance),
            delay: Duration::from_millis(config.topup_delay_ms),
        }
    }
}

/// Outcome of a funding pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FundingReport {
    /// Signers whose balance was read
    pub checked: u32,
    /// Signers that received a transfer
    pub transfers: u32,
    /// Sum of all transferred amounts
    pub total: Balance,
}

/// Amount needed to bring `current` up to `target`
pub fn topup_amount(current: Balance, target: Balance) -> Option<Balance> {
    target.checked_sub(current).filter(|amount| *amount > 0)
}

/// Moves funds between the admin account and the signer pool
pub struct SignerFunding<'a, C: ChainClient + ?Sized> {
    chain: &'a C,
    admin: &'a Identity,
    settings: FundingSettings,
}

impl<'a, C: ChainClient + ?Sized> SignerFunding<'a, C> {
    pub fn new(chain: &'a C, admin: &'a Identity, settings: FundingSettings) -> Self {
        Self {
            chain,
            admin,
            settings,
        }
    }

    /// Top up every signer below the configured balance, in seed order
    pub async fn ensure_funded(&self, pool: &SignerPool) -> Result<FundingReport> {
        let mut report = FundingReport::default();

        for signer in pool.iter() {
            let free = self.chain.account(signer.account()).await?.free;
            report.checked += 1;
            info!(
                "Balance for signer with seed {} is {}",
                seed_label(signer),
                free
            );

            let Some(amount) = topup_amount(free, self.settings.topup_balance) else {
                continue;
            };

            info!(
                "Topping up signer {} (seed: {}) with {}",
                signer.address(),
                seed_label(signer),
                amount
            );

            let transfer = Operation::TransferKeepAlive {
                dest: signer.account().clone(),
                value: amount,
            };
            let hash = self.chain.submit(&transfer, self.admin).await?;
            debug!("Top-up submitted: {:?}", hash);

            report.transfers += 1;
            report.total += amount;

            tokio::time::sleep(self.settings.delay).await;
        }

        info!(
            "Funding complete: {} of {} signers topped up with {} in total",
            report.transfers, report.checked, report.total
        );

        Ok(report)
    }

    /// Send every signer's free balance back to the admin account
    pub async fn collect(&self, pool: &SignerPool, dry_run: bool) -> Result<FundingReport> {
        let mut report = FundingReport::default();

        for signer in pool.iter() {
            let free = self.chain.account(signer.account()).await?.free;
            report.checked += 1;
            info!(
                "Balance for signer with seed {} is {}",
                seed_label(signer),
                free
            );

            if free == 0 {
                continue;
            }

            report.transfers += 1;
            report.total += free;

            if dry_run {
                info!(
                    "DRY-RUN: Would sweep {} from {} to {}",
                    free,
                    signer.address(),
                    self.admin.address()
                );
                continue;
            }

            let sweep = Operation::TransferAll {
                dest: self.admin.account().clone(),
                keep_alive: false,
            };
            let hash = self.chain.submit(&sweep, signer).await?;
            debug!("Sweep submitted: {:?}", hash);

            tokio::time::sleep(self.settings.delay).await;

            let admin_balance = self.chain.account(self.admin.account()).await?.free;
            info!("New balance for admin is {}", admin_balance);
        }

        Ok(report)
    }
}

fn seed_label(signer: &Identity) -> String {
    signer
        .seed()
        .map(|seed| seed.to_string())
        .unwrap_or_else(|| "admin".to_string())
}
