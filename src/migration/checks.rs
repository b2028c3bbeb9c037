//! Per-key predicates of the migration jobs

use async_trait::async_trait;
use tracing::info;

use crate::chain::{
    decode_balance, runtime_api, Balance, BoolCodec, ChainClient, Collection, Key, Operation,
};
use crate::error::Result;

use super::scanner::MigrationCheck;

async fn predicate<C: ChainClient + ?Sized>(chain: &C, method: &str, key: &Key) -> Result<bool> {
    let output = chain.call(method, key.as_bytes()).await?;
    Ok(BoolCodec::decode(&output)?.into())
}

async fn amount<C: ChainClient + ?Sized>(chain: &C, method: &str, key: &Key) -> Result<Balance> {
    let output = chain.call(method, key.as_bytes()).await?;
    decode_balance(&output)
}

/// Nomination pools moving to delegated stake
pub struct PoolMigration<'a, C: ChainClient + ?Sized> {
    chain: &'a C,
}

impl<'a, C: ChainClient + ?Sized> PoolMigration<'a, C> {
    pub fn new(chain: &'a C) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl<'a, C: ChainClient + ?Sized> MigrationCheck for PoolMigration<'a, C> {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn collection(&self) -> Collection {
        Collection::BondedPools
    }

    async fn needs_migration(&self, key: &Key) -> Result<bool> {
        predicate(self.chain, runtime_api::POOL_NEEDS_DELEGATE_MIGRATION, key).await
    }

    async fn has_pending_slash(&self, key: &Key) -> Result<bool> {
        let pending = amount(self.chain, runtime_api::POOL_PENDING_SLASH, key).await?;
        if pending > 0 {
            info!("Pool {} has a pending slash of {}", key, pending);
        }
        Ok(pending > 0)
    }

    fn migration(&self, key: &Key) -> Result<Operation> {
        Ok(Operation::MigratePool {
            pool_id: key.pool_id()?,
        })
    }
}

/// Pool members moving to delegated stake
pub struct MemberMigration<'a, C: ChainClient + ?Sized> {
    chain: &'a C,
    existential_deposit: Balance,
}

impl<'a, C: ChainClient + ?Sized> MemberMigration<'a, C> {
    pub fn new(chain: &'a C, existential_deposit: Balance) -> Self {
        Self {
            chain,
            existential_deposit,
        }
    }
}

#[async_trait]
impl<'a, C: ChainClient + ?Sized> MigrationCheck for MemberMigration<'a, C> {
    fn name(&self) -> &'static str {
        "member"
    }

    fn collection(&self) -> Collection {
        Collection::PoolMembers
    }

    /// Free balance under the existential deposit
    async fn is_balance_low(&self, key: &Key) -> Result<bool> {
        let info = self.chain.account(&key.account()?).await?;
        Ok(info.free < self.existential_deposit)
    }

    /// Members that are also bonded stashes stake on their own
    async fn is_staking_directly(&self, key: &Key) -> Result<bool> {
        let controller = self.chain.bonded_controller(&key.account()?).await?;
        Ok(controller.is_some())
    }

    async fn needs_migration(&self, key: &Key) -> Result<bool> {
        predicate(self.chain, runtime_api::MEMBER_NEEDS_DELEGATE_MIGRATION, key).await
    }

    async fn has_pending_slash(&self, key: &Key) -> Result<bool> {
        let pending = amount(self.chain, runtime_api::MEMBER_PENDING_SLASH, key).await?;
        Ok(pending > 0)
    }

    fn migration(&self, key: &Key) -> Result<Operation> {
        Ok(Operation::MigrateDelegation {
            member: key.account()?,
        })
    }

    fn slash(&self, key: &Key) -> Result<Option<Operation>> {
        Ok(Some(Operation::ApplySlash {
            member: key.account()?,
        }))
    }
}

/// Stakers still holding the legacy `staking ` lock
pub struct CurrencyMigration<'a, C: ChainClient + ?Sized> {
    chain: &'a C,
}

impl<'a, C: ChainClient + ?Sized> CurrencyMigration<'a, C> {
    pub fn new(chain: &'a C) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl<'a, C: ChainClient + ?Sized> MigrationCheck for CurrencyMigration<'a, C> {
    fn name(&self) -> &'static str {
        "staker"
    }

    fn collection(&self) -> Collection {
        Collection::StakingBonded
    }

    async fn needs_migration(&self, key: &Key) -> Result<bool> {
        let stash = key.account()?;
        let locked = self
            .chain
            .balance_locks(&stash)
            .await?
            .iter()
            .any(|lock| lock.is_staking());
        if !locked {
            return Ok(false);
        }
        // virtual stakers never had a currency lock to migrate
        Ok(!self.chain.is_virtual_staker(&stash).await?)
    }

    fn migration(&self, key: &Key) -> Result<Operation> {
        Ok(Operation::MigrateCurrency {
            stash: key.account()?,
        })
    }
}
