//! In-memory chain used by unit tests

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use subxt::utils::H256;

use crate::chain::{
    AccountId, AccountInfo, Balance, BalanceLock, ChainClient, Collection, Key, Operation,
    Snapshot, TxHash,
};
use crate::error::{Error, Result};
use crate::wallet::keyring::{Identity, MasterSecret};

/// Well-known development phrase
pub const DEV_PHRASE: &str =
    "bottom drive obey lake curtain smoke basket hold race lonely fit walk";

pub fn dev_secret() -> MasterSecret {
    MasterSecret::new(DEV_PHRASE)
}

/// A recorded submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub signer: AccountId,
    pub operations: Vec<Operation>,
    pub batched: bool,
}

pub struct MockChain {
    snapshot: Snapshot,
    pub keys: HashMap<Collection, Vec<Key>>,
    pub calls: HashMap<(String, Vec<u8>), Vec<u8>>,
    pub failing_calls: HashSet<(String, Vec<u8>)>,
    pub failing_accounts: BTreeSet<AccountId>,
    pub refs: BTreeMap<AccountId, (u32, u32)>,
    pub locks: BTreeMap<AccountId, Vec<BalanceLock>>,
    pub virtual_stakers: BTreeSet<AccountId>,
    pub bonded: BTreeMap<AccountId, AccountId>,
    pub existential_deposit: Balance,
    pub connection_lost: bool,
    pub reject_submissions: bool,
    balances: Mutex<BTreeMap<AccountId, Balance>>,
    submissions: Mutex<Vec<Submission>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            snapshot: Snapshot {
                number: 100,
                hash: H256::zero(),
            },
            keys: HashMap::new(),
            calls: HashMap::new(),
            failing_calls: HashSet::new(),
            failing_accounts: BTreeSet::new(),
            refs: BTreeMap::new(),
            locks: BTreeMap::new(),
            virtual_stakers: BTreeSet::new(),
            bonded: BTreeMap::new(),
            existential_deposit: 10,
            connection_lost: false,
            reject_submissions: false,
            balances: Mutex::new(BTreeMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Answer `method(key)` with a one-byte boolean
    pub fn with_predicate(mut self, method: &str, key: &Key, value: bool) -> Self {
        self.calls.insert(
            (method.to_string(), key.as_bytes().to_vec()),
            vec![value as u8],
        );
        self
    }

    /// Answer `method(key)` with a SCALE `u128`
    pub fn with_amount(mut self, method: &str, key: &Key, amount: Balance) -> Self {
        self.calls.insert(
            (method.to_string(), key.as_bytes().to_vec()),
            amount.to_le_bytes().to_vec(),
        );
        self
    }

    pub fn with_keys(mut self, collection: Collection, keys: Vec<Key>) -> Self {
        self.keys.insert(collection, keys);
        self
    }

    pub fn set_balance(&self, account: &AccountId, balance: Balance) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert(account.clone(), balance);
        }
    }

    pub fn balance(&self, account: &AccountId) -> Balance {
        self.balances
            .lock()
            .map(|b| b.get(account).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Fund every signer of a pool generously
    pub fn fund_all<'a>(&self, signers: impl Iterator<Item = &'a Identity>) {
        for signer in signers {
            self.set_balance(signer.account(), 1_000_000_000);
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn apply(&self, operation: &Operation, signer: &AccountId) {
        let Ok(mut balances) = self.balances.lock() else {
            return;
        };
        match operation {
            Operation::TransferKeepAlive { dest, value } => {
                let from = balances.get(signer).copied().unwrap_or(0);
                balances.insert(signer.clone(), from.saturating_sub(*value));
                *balances.entry(dest.clone()).or_insert(0) += *value;
            }
            Operation::TransferAll { dest, .. } => {
                let amount = balances.insert(signer.clone(), 0).unwrap_or(0);
                *balances.entry(dest.clone()).or_insert(0) += amount;
            }
            _ => {}
        }
    }

    fn record(&self, operations: Vec<Operation>, signer: &Identity, batched: bool) -> Result<TxHash> {
        if self.reject_submissions {
            return Err(Error::Submission("rejected by mock".to_string()));
        }
        for operation in &operations {
            self.apply(operation, signer.account());
        }
        let mut submissions = self
            .submissions
            .lock()
            .map_err(|e| Error::Submission(e.to_string()))?;
        submissions.push(Submission {
            signer: signer.account().clone(),
            operations,
            batched,
        });
        Ok(H256::from_low_u64_be(submissions.len() as u64))
    }

    fn check_connection(&self) -> Result<()> {
        if self.connection_lost {
            return Err(Error::RpcConnection("mock connection lost".to_string()));
        }
        Ok(())
    }

    fn check_account(&self, account: &AccountId) -> Result<()> {
        self.check_connection()?;
        if self.failing_accounts.contains(account) {
            return Err(Error::Decode("balance exceeds representable range".to_string()));
        }
        Ok(())
    }
}

/// `false` for predicates, zero for amounts
fn default_output(method: &str) -> Vec<u8> {
    if method.ends_with("pending_slash") {
        0u128.to_le_bytes().to_vec()
    } else {
        vec![0]
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<Key>> {
        self.check_connection()?;
        Ok(self.keys.get(&collection).cloned().unwrap_or_default())
    }

    async fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        self.check_connection()?;
        let lookup = (method.to_string(), args.to_vec());
        if self.failing_calls.contains(&lookup) {
            return Err(Error::Rpc(format!("{} failed", method)));
        }
        Ok(self
            .calls
            .get(&lookup)
            .cloned()
            .unwrap_or_else(|| default_output(method)))
    }

    async fn account(&self, account: &AccountId) -> Result<AccountInfo> {
        self.check_account(account)?;
        let (providers, consumers) = self.refs.get(account).copied().unwrap_or((1, 0));
        Ok(AccountInfo {
            providers,
            consumers,
            free: self.balance(account),
            ..AccountInfo::default()
        })
    }

    async fn balance_locks(&self, account: &AccountId) -> Result<Vec<BalanceLock>> {
        self.check_account(account)?;
        Ok(self.locks.get(account).cloned().unwrap_or_default())
    }

    async fn is_virtual_staker(&self, account: &AccountId) -> Result<bool> {
        self.check_account(account)?;
        Ok(self.virtual_stakers.contains(account))
    }

    async fn bonded_controller(&self, stash: &AccountId) -> Result<Option<AccountId>> {
        self.check_connection()?;
        Ok(self.bonded.get(stash).cloned())
    }

    async fn existential_deposit(&self) -> Result<Balance> {
        self.check_connection()?;
        Ok(self.existential_deposit)
    }

    async fn submit(&self, operation: &Operation, signer: &Identity) -> Result<TxHash> {
        self.record(vec![operation.clone()], signer, false)
    }

    async fn submit_batch(&self, operations: &[Operation], signer: &Identity) -> Result<TxHash> {
        self.record(operations.to_vec(), signer, true)
    }
}
