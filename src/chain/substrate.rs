//! `subxt`-backed chain client
//!
//! Connects over WebSocket, pins the best block at connect time and serves
//! key enumeration and runtime-API calls from that block. Account state is
//! always read at the latest block so funding decisions see fresh balances.

use async_trait::async_trait;
use futures::StreamExt;
use subxt::dynamic::{self, Value};
use subxt::error::RpcError;
use subxt::ext::codec::{Decode, Input};
use subxt::ext::scale_value::Composite;
use subxt::utils::AccountId32;
use subxt::{OnlineClient, PolkadotConfig};
use tracing::{debug, info};

use super::{
    AccountId, AccountInfo, Balance, BalanceLock, ChainClient, Collection, Key, Operation,
    Snapshot, TxHash,
};
use crate::error::{Error, Result};
use crate::wallet::keyring::Identity;

/// Length of `twox128(pallet) ++ twox128(entry)`
const STORAGE_PREFIX_LEN: usize = 32;

/// Length of the `twox64` part of a `Twox64Concat` hashed key
const TWOX64_LEN: usize = 8;

/// Chain client over a live node
pub struct SubstrateChain {
    api: OnlineClient<PolkadotConfig>,
    snapshot: Snapshot,
}

impl SubstrateChain {
    /// Connect to `endpoint` and pin the current best block
    pub async fn connect(endpoint: &str) -> Result<Self> {
        info!("Connecting to {}", endpoint);

        let api = OnlineClient::<PolkadotConfig>::from_insecure_url(endpoint)
            .await
            .map_err(|e| Error::RpcConnection(format!("{}: {}", endpoint, e)))?;

        let latest = api.blocks().at_latest().await.map_err(rpc_error)?;
        let snapshot = Snapshot {
            number: latest.number().into(),
            hash: latest.hash(),
        };

        info!("Pinned snapshot at block {}", snapshot);

        Ok(Self { api, snapshot })
    }

    /// Runtime spec version the client was built against
    pub fn spec_version(&self) -> u32 {
        self.api.runtime_version().spec_version
    }

    /// Genesis hash of the connected chain
    pub fn genesis_hash(&self) -> TxHash {
        self.api.genesis_hash()
    }

    async fn fetch_latest(
        &self,
        pallet: &str,
        entry: &str,
        account: &AccountId,
    ) -> Result<Option<Vec<u8>>> {
        let address = dynamic::storage(pallet, entry, vec![Value::from_bytes(account.0)]);
        let storage = self.api.storage().at_latest().await.map_err(rpc_error)?;
        let value = storage.fetch(&address).await.map_err(rpc_error)?;
        Ok(value.map(|thunk| thunk.encoded().to_vec()))
    }
}

#[async_trait]
impl ChainClient for SubstrateChain {
    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<Key>> {
        let (pallet, entry) = collection.storage_name();
        let address = dynamic::storage(pallet, entry, Vec::<Value>::new());
        let storage = self.api.storage().at(self.snapshot.hash);

        let mut iter = storage.iter(address).await.map_err(rpc_error)?;
        let mut keys = Vec::new();
        while let Some(pair) = iter.next().await {
            let pair = pair.map_err(rpc_error)?;
            keys.push(map_key(&pair.key_bytes)?);
        }

        debug!("Fetched {} keys of {}", keys.len(), collection);
        Ok(keys)
    }

    async fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>> {
        let runtime_api = self.api.runtime_api().at(self.snapshot.hash);
        let output: RawOutput = runtime_api
            .call_raw(method, Some(args))
            .await
            .map_err(rpc_error)?;
        Ok(output.0)
    }

    async fn account(&self, account: &AccountId) -> Result<AccountInfo> {
        match self.fetch_latest("System", "Account", account).await? {
            Some(bytes) => decode_account_info(&bytes),
            None => Ok(AccountInfo::default()),
        }
    }

    async fn balance_locks(&self, account: &AccountId) -> Result<Vec<BalanceLock>> {
        match self.fetch_latest("Balances", "Locks", account).await? {
            Some(bytes) => decode_locks(&bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn is_virtual_staker(&self, account: &AccountId) -> Result<bool> {
        let value = self
            .fetch_latest("Staking", "VirtualStakers", account)
            .await?;
        Ok(value.is_some())
    }

    async fn bonded_controller(&self, stash: &AccountId) -> Result<Option<AccountId>> {
        let address = dynamic::storage("Staking", "Bonded", vec![Value::from_bytes(stash.0)]);
        let storage = self.api.storage().at(self.snapshot.hash);
        match storage.fetch(&address).await.map_err(rpc_error)? {
            Some(thunk) => {
                let bytes = <[u8; 32]>::decode(&mut thunk.encoded())?;
                Ok(Some(AccountId32(bytes)))
            }
            None => Ok(None),
        }
    }

    async fn existential_deposit(&self) -> Result<Balance> {
        let address = dynamic::constant("Balances", "ExistentialDeposit");
        let thunk = self.api.constants().at(&address).map_err(rpc_error)?;
        Ok(Balance::decode(&mut thunk.encoded())?)
    }

    async fn submit(&self, operation: &Operation, signer: &Identity) -> Result<TxHash> {
        let (pallet, call) = operation.call_name();
        let payload = dynamic::tx(pallet, call, call_fields(operation));

        self.api
            .tx()
            .sign_and_submit_default(&payload, signer.keypair())
            .await
            .map_err(|e| Error::Submission(format!("{}: {}", operation, e)))
    }

    async fn submit_batch(&self, operations: &[Operation], signer: &Identity) -> Result<TxHash> {
        let calls = Value::unnamed_composite(operations.iter().map(runtime_call));
        let payload = dynamic::tx(
            "Utility",
            "batch",
            Composite::Named(vec![("calls".to_string(), calls)]),
        );

        self.api
            .tx()
            .sign_and_submit_default(&payload, signer.keypair())
            .await
            .map_err(|e| {
                Error::Submission(format!("batch of {} calls: {}", operations.len(), e))
            })
    }
}

/// Runtime API output kept as raw bytes
struct RawOutput(Vec<u8>);

impl Decode for RawOutput {
    fn decode<I: Input>(input: &mut I) -> std::result::Result<Self, subxt::ext::codec::Error> {
        let len = input.remaining_len()?.unwrap_or(0);
        let mut bytes = vec![0u8; len];
        input.read(&mut bytes)?;
        Ok(Self(bytes))
    }
}

fn rpc_error(err: subxt::Error) -> Error {
    match err {
        subxt::Error::Rpc(RpcError::SubscriptionDropped) => {
            Error::RpcConnection("subscription dropped".to_string())
        }
        subxt::Error::Rpc(RpcError::ClientError(e)) if is_transport_failure(&*e) => {
            Error::RpcConnection(e.to_string())
        }
        other => Error::Rpc(other.to_string()),
    }
}

/// Whether an RPC client error means the socket is gone
///
/// The default jsonrpsee backend has no typed disconnect variant (only the
/// reconnecting client, which is not enabled here, reports one). An
/// `io::Error` anywhere in the source chain counts, otherwise the messages
/// jsonrpsee uses for a dead background task are matched.
fn is_transport_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut cause = Some(err);
    while let Some(current) = cause {
        if current.downcast_ref::<std::io::Error>().is_some()
            || is_transport_message(&current.to_string())
        {
            return true;
        }
        cause = current.source();
    }
    false
}

fn is_transport_message(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "restart required",
        "restart needed",
        "connection closed",
        "connection reset",
        "broken pipe",
        "background task",
        "networking or low-level protocol error",
    ]
    .iter()
    .any(|phrase| message.contains(phrase))
}

/// Extract the SCALE-encoded map key from a `Twox64Concat` storage key
pub fn map_key(storage_key: &[u8]) -> Result<Key> {
    let offset = STORAGE_PREFIX_LEN + TWOX64_LEN;
    if storage_key.len() <= offset {
        return Err(Error::InvalidKey(format!(
            "storage key of {} bytes has no map key",
            storage_key.len()
        )));
    }
    Ok(Key::from_bytes(&storage_key[offset..]))
}

/// Decode `System.Account` (nonce, refs, then `AccountData`)
pub fn decode_account_info(bytes: &[u8]) -> Result<AccountInfo> {
    let mut input = bytes;
    let (nonce, consumers, providers, sufficients, free, reserved, frozen) =
        <(u32, u32, u32, u32, u128, u128, u128)>::decode(&mut input)?;
    Ok(AccountInfo {
        nonce,
        consumers,
        providers,
        sufficients,
        free,
        reserved,
        frozen,
    })
}

/// Decode `Balances.Locks` (id, amount, reasons)
pub fn decode_locks(bytes: &[u8]) -> Result<Vec<BalanceLock>> {
    let mut input = bytes;
    let locks = Vec::<([u8; 8], u128, u8)>::decode(&mut input)?;
    Ok(locks
        .into_iter()
        .map(|(id, amount, _reasons)| BalanceLock { id, amount })
        .collect())
}

fn multi_address(account: &AccountId) -> Value {
    Value::unnamed_variant("Id", [Value::from_bytes(account.0)])
}

/// Named call arguments of an operation
fn call_fields(operation: &Operation) -> Composite<()> {
    let fields = match operation {
        Operation::MigratePool { pool_id } => {
            vec![("pool_id", Value::u128(u128::from(*pool_id)))]
        }
        Operation::MigrateDelegation { member } | Operation::ApplySlash { member } => {
            vec![("member_account", multi_address(member))]
        }
        Operation::MigrateCurrency { stash } => {
            vec![("stash", Value::from_bytes(stash.0))]
        }
        Operation::TransferKeepAlive { dest, value } => vec![
            ("dest", multi_address(dest)),
            ("value", Value::u128(*value)),
        ],
        Operation::TransferAll { dest, keep_alive } => vec![
            ("dest", multi_address(dest)),
            ("keep_alive", Value::bool(*keep_alive)),
        ],
    };

    Composite::Named(
        fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    )
}

/// `RuntimeCall` value of an operation, for nesting inside `Utility.batch`
fn runtime_call(operation: &Operation) -> Value {
    let (pallet, call) = operation.call_name();
    Value::unnamed_variant(pallet, [Value::variant(call, call_fields(operation))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use subxt::ext::codec::Encode;

    #[test]
    fn test_map_key_strips_hashed_prefix() {
        let mut storage_key = vec![0xaa; STORAGE_PREFIX_LEN + TWOX64_LEN];
        storage_key.extend_from_slice(&7u32.to_le_bytes());

        let key = map_key(&storage_key).unwrap();
        assert_eq!(key.pool_id().unwrap(), 7);

        assert!(map_key(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_decode_account_info() {
        let encoded = (3u32, 1u32, 2u32, 0u32, 500u128, 10u128, 20u128, 0u128).encode();
        let info = decode_account_info(&encoded).unwrap();
        assert_eq!(info.nonce, 3);
        assert_eq!(info.consumers, 1);
        assert_eq!(info.providers, 2);
        assert_eq!(info.free, 500);
        assert_eq!(info.frozen, 20);

        assert!(decode_account_info(&encoded[..10]).is_err());
    }

    #[test]
    fn test_decode_locks() {
        let encoded = vec![(*b"staking ", 1_000u128, 2u8), (*b"vesting ", 5u128, 0u8)].encode();
        let locks = decode_locks(&encoded).unwrap();
        assert_eq!(locks.len(), 2);
        assert!(locks[0].is_staking());
        assert_eq!(locks[0].amount, 1_000);
        assert!(!locks[1].is_staking());
    }

    #[test]
    fn test_raw_output_keeps_all_bytes() {
        let bytes = [0x01u8, 0x02, 0x03];
        let output = RawOutput::decode(&mut &bytes[..]).unwrap();
        assert_eq!(output.0, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_transport_failure_detection() {
        assert!(is_transport_message(
            "The background task closed connection closed; restart required"
        ));
        assert!(is_transport_message("Connection reset by peer"));
        assert!(!is_transport_message("Method not found"));
    }

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "client failure")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_io_error_maps_to_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "gone");
        let err = rpc_error(subxt::Error::Rpc(RpcError::ClientError(Box::new(Wrapped(io)))));
        assert!(matches!(err, Error::RpcConnection(_)));
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_method_error_is_not_connectivity() {
        let plain: Box<dyn std::error::Error + Send + Sync> = "Method not found".into();
        let err = rpc_error(subxt::Error::Rpc(RpcError::ClientError(plain)));
        assert!(matches!(err, Error::Rpc(_)));
    }

    #[test]
    fn test_call_fields_names() {
        let fields = call_fields(&Operation::MigratePool { pool_id: 1 });
        match fields {
            Composite::Named(values) => assert_eq!(values[0].0, "pool_id"),
            Composite::Unnamed(_) => panic!("expected named fields"),
        }
    }
}
