//! Chain client boundary
//!
//! Everything the jobs need from a node goes through [`ChainClient`]:
//! key enumeration and runtime-API calls against a pinned snapshot, live
//! account lookups, and transaction submission. [`substrate::SubstrateChain`]
//! is the production implementation.
//!
//! ```text
//! MigrationScanner → MigrationCheck → ChainClient (snapshot reads)
//!        ↓
//! BatchDispatcher → SignerPool → ChainClient (live balance, submit)
//! ```

pub mod substrate;

use async_trait::async_trait;
use std::fmt;
use subxt::ext::codec::Decode;
use subxt::utils::{AccountId32, H256};

use crate::error::{Error, Result};
use crate::wallet::keyring::Identity;

pub use substrate::SubstrateChain;

/// Balance in the chain's smallest unit
pub type Balance = u128;

/// Account identifier used on the chain
pub type AccountId = AccountId32;

/// Hash returned when a transaction is accepted by the node
pub type TxHash = H256;

/// Lock id placed by the legacy staking currency
pub const STAKING_LOCK_ID: [u8; 8] = *b"staking ";

/// Runtime API methods queried by the jobs
pub mod runtime_api {
    pub const POOL_NEEDS_DELEGATE_MIGRATION: &str =
        "NominationPoolsApi_pool_needs_delegate_migration";
    pub const POOL_PENDING_SLASH: &str = "NominationPoolsApi_pool_pending_slash";
    pub const MEMBER_NEEDS_DELEGATE_MIGRATION: &str =
        "NominationPoolsApi_member_needs_delegate_migration";
    pub const MEMBER_PENDING_SLASH: &str = "NominationPoolsApi_member_pending_slash";
}

/// Storage maps whose keys the jobs enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// `NominationPools.BondedPools`, keyed by pool id
    BondedPools,
    /// `NominationPools.PoolMembers`, keyed by member account
    PoolMembers,
    /// `Staking.Bonded`, keyed by stash account
    StakingBonded,
}

impl Collection {
    /// Pallet and storage entry names
    pub fn storage_name(&self) -> (&'static str, &'static str) {
        match self {
            Collection::BondedPools => ("NominationPools", "BondedPools"),
            Collection::PoolMembers => ("NominationPools", "PoolMembers"),
            Collection::StakingBonded => ("Staking", "Bonded"),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pallet, entry) = self.storage_name();
        write!(f, "{}.{}", pallet, entry)
    }
}

/// SCALE-encoded storage map key
///
/// The bytes are exactly what a runtime API expects as its argument, so a key
/// taken from a collection can be passed to [`ChainClient::call`] as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Key of a pool id (`u32`, little endian)
    pub fn from_pool_id(pool_id: u32) -> Self {
        Self(pool_id.to_le_bytes().to_vec())
    }

    /// Key of an account
    pub fn from_account(account: &AccountId) -> Self {
        Self(account.0.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Interpret the key as a pool id
    pub fn pool_id(&self) -> Result<u32> {
        let bytes: [u8; 4] = self
            .0
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("expected 4 bytes, got {}", self.0.len())))?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Interpret the key as an account id
    pub fn account(&self) -> Result<AccountId> {
        let bytes: [u8; 32] = self
            .0
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("expected 32 bytes, got {}", self.0.len())))?;
        Ok(AccountId32(bytes))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            4 => write!(f, "#{}", self.pool_id().unwrap_or_default()),
            32 => match self.account() {
                Ok(account) => write!(f, "{}", account),
                Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
            },
            _ => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

/// One-byte boolean returned by runtime API predicates
///
/// Decoded once at the client boundary; callers only ever see the `bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolCodec(pub bool);

impl BoolCodec {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [0x01] => Ok(Self(true)),
            [0x00] => Ok(Self(false)),
            other => Err(Error::Decode(format!(
                "expected a single 0x00/0x01 byte, got 0x{}",
                hex::encode(other)
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.0 as u8]
    }
}

impl From<BoolCodec> for bool {
    fn from(value: BoolCodec) -> Self {
        value.0
    }
}

/// Decode a SCALE `u128` balance returned by a runtime API
pub fn decode_balance(bytes: &[u8]) -> Result<Balance> {
    let mut input = bytes;
    let balance = Balance::decode(&mut input)?;
    if !input.is_empty() {
        return Err(Error::Decode(format!(
            "{} trailing bytes after balance",
            input.len()
        )));
    }
    Ok(balance)
}

/// Subset of `System.Account` the jobs read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub nonce: u32,
    pub consumers: u32,
    pub providers: u32,
    pub sufficients: u32,
    pub free: Balance,
    pub reserved: Balance,
    pub frozen: Balance,
}

/// Entry of `Balances.Locks`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceLock {
    pub id: [u8; 8],
    pub amount: Balance,
}

impl BalanceLock {
    pub fn is_staking(&self) -> bool {
        self.id == STAKING_LOCK_ID
    }
}

/// Block the read-only queries are pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub number: u64,
    pub hash: H256,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({:?})", self.number, self.hash)
    }
}

/// Chain-defined transaction intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `NominationPools.migrate_pool_to_delegate_stake`
    MigratePool { pool_id: u32 },
    /// `NominationPools.migrate_delegation`
    MigrateDelegation { member: AccountId },
    /// `NominationPools.apply_slash`
    ApplySlash { member: AccountId },
    /// `Staking.migrate_currency`
    MigrateCurrency { stash: AccountId },
    /// `Balances.transfer_keep_alive`
    TransferKeepAlive { dest: AccountId, value: Balance },
    /// `Balances.transfer_all`
    TransferAll { dest: AccountId, keep_alive: bool },
}

impl Operation {
    /// Pallet and call names
    pub fn call_name(&self) -> (&'static str, &'static str) {
        match self {
            Operation::MigratePool { .. } => ("NominationPools", "migrate_pool_to_delegate_stake"),
            Operation::MigrateDelegation { .. } => ("NominationPools", "migrate_delegation"),
            Operation::ApplySlash { .. } => ("NominationPools", "apply_slash"),
            Operation::MigrateCurrency { .. } => ("Staking", "migrate_currency"),
            Operation::TransferKeepAlive { .. } => ("Balances", "transfer_keep_alive"),
            Operation::TransferAll { .. } => ("Balances", "transfer_all"),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pallet, call) = self.call_name();
        match self {
            Operation::MigratePool { pool_id } => write!(f, "{}.{}(#{})", pallet, call, pool_id),
            Operation::MigrateDelegation { member } | Operation::ApplySlash { member } => {
                write!(f, "{}.{}({})", pallet, call, member)
            }
            Operation::MigrateCurrency { stash } => write!(f, "{}.{}({})", pallet, call, stash),
            Operation::TransferKeepAlive { dest, value } => {
                write!(f, "{}.{}({}, {})", pallet, call, dest, value)
            }
            Operation::TransferAll { dest, keep_alive } => {
                write!(f, "{}.{}({}, {})", pallet, call, dest, keep_alive)
            }
        }
    }
}

/// Node access used by every job
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Block the snapshot reads are pinned to
    fn snapshot(&self) -> &Snapshot;

    /// All keys of a collection at the snapshot, in storage order
    async fn keys(&self, collection: Collection) -> Result<Vec<Key>>;

    /// Raw runtime API call at the snapshot
    async fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>>;

    /// Current account info (not the snapshot)
    async fn account(&self, account: &AccountId) -> Result<AccountInfo>;

    /// Current balance locks of an account
    async fn balance_locks(&self, account: &AccountId) -> Result<Vec<BalanceLock>>;

    /// Whether the account is registered as a virtual staker
    async fn is_virtual_staker(&self, account: &AccountId) -> Result<bool>;

    /// Controller of a bonded stash, `None` if the account is not bonded
    async fn bonded_controller(&self, stash: &AccountId) -> Result<Option<AccountId>>;

    /// Existential deposit of the native balance
    async fn existential_deposit(&self) -> Result<Balance>;

    /// Sign and submit one operation
    async fn submit(&self, operation: &Operation, signer: &Identity) -> Result<TxHash>;

    /// Sign and submit operations as one atomic batch
    async fn submit_batch(&self, operations: &[Operation], signer: &Identity) -> Result<TxHash>;
}
