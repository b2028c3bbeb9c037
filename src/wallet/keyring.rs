//! Signer identities derived from the master secret
//!
//! Every signer is `"{mnemonic}//{seed}"` for a seed in a contiguous window
//! `[first_seed, first_seed + size)`. Pool membership is a pure function of
//! configuration; nothing is persisted.

use std::fmt;
use std::str::FromStr;
use subxt_signer::sr25519::Keypair;
use subxt_signer::SecretUri;
use tracing::debug;

use crate::chain::AccountId;
use crate::error::{Error, Result};

/// Mnemonic (or secret URI) the admin and all signers derive from
#[derive(Clone)]
pub struct MasterSecret(String);

impl MasterSecret {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self(phrase.into())
    }

    /// Read the secret from an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        std::env::var(var)
            .map(Self)
            .map_err(|_| Error::MissingEnvVar(var.to_string()))
    }

    /// Derive the identity at `seed`, or the root identity for `None`
    pub fn derive(&self, seed: Option<u32>) -> Result<Identity> {
        let uri = match seed {
            Some(seed) => format!("{}//{}", self.0, seed),
            None => self.0.clone(),
        };

        let uri = SecretUri::from_str(&uri)
            .map_err(|e| Error::Derivation(format!("invalid secret uri: {}", e)))?;
        let keypair = Keypair::from_uri(&uri).map_err(|e| Error::Derivation(e.to_string()))?;

        Ok(Identity::new(keypair, seed))
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(***)")
    }
}

/// A signing identity with its on-chain account
pub struct Identity {
    keypair: Keypair,
    account: AccountId,
    seed: Option<u32>,
}

impl Identity {
    fn new(keypair: Keypair, seed: Option<u32>) -> Self {
        let account = keypair.public_key().to_account_id();
        Self {
            keypair,
            account,
            seed,
        }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// SS58 address
    pub fn address(&self) -> String {
        self.account.to_string()
    }

    /// Derivation seed, `None` for the admin
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .field("seed", &self.seed)
            .finish()
    }
}

/// Signer seed for a rotation counter
///
/// `(rotation / batch_size) % pool_size + first_seed`, so consecutive batches
/// of work move to the next signer and wrap around the window.
pub fn rotation_seed(rotation: u64, batch_size: usize, pool_size: usize, first_seed: u32) -> u32 {
    let batch_size = batch_size.max(1) as u64;
    let pool_size = pool_size.max(1) as u64;
    first_seed + ((rotation / batch_size) % pool_size) as u32
}

/// Fixed window of derived signers used in rotation
#[derive(Debug)]
pub struct SignerPool {
    first_seed: u32,
    signers: Vec<Identity>,
}

impl SignerPool {
    /// Derive `size` signers starting at `first_seed`
    pub fn derive(secret: &MasterSecret, first_seed: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("signer pool cannot be empty".to_string()));
        }

        let end = first_seed.checked_add(size).ok_or_else(|| {
            Error::Config(format!(
                "signer window of {} seeds starting at {} exceeds the seed range",
                size, first_seed
            ))
        })?;

        let signers = (first_seed..end)
            .map(|seed| secret.derive(Some(seed)))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Derived {} signers (seeds {}..{})",
            signers.len(),
            first_seed,
            end
        );

        Ok(Self {
            first_seed,
            signers,
        })
    }

    pub fn first_seed(&self) -> u32 {
        self.first_seed
    }

    /// Highest seed in the window
    pub fn last_seed(&self) -> u32 {
        self.first_seed + (self.signers.len() as u32).saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.signers.iter()
    }

    /// Signer derived at `seed`, if it is inside the window
    pub fn by_seed(&self, seed: u32) -> Option<&Identity> {
        seed.checked_sub(self.first_seed)
            .and_then(|offset| self.signers.get(offset as usize))
    }

    /// Signer responsible for the batch at `rotation`
    pub fn select(&self, rotation: u64, batch_size: usize) -> &Identity {
        let seed = rotation_seed(rotation, batch_size, self.signers.len(), self.first_seed);
        &self.signers[(seed - self.first_seed) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::dev_secret;

    #[test]
    fn test_rotation_seed() {
        // batch size 1, 6 accounts, no shift
        assert_eq!(rotation_seed(0, 1, 6, 0), 0);
        assert_eq!(rotation_seed(1, 1, 6, 0), 1);
        assert_eq!(rotation_seed(6, 1, 6, 0), 0);
        assert_eq!(rotation_seed(7, 1, 6, 0), 1);

        // batch size 5: five migrations share a signer
        assert_eq!(rotation_seed(4, 5, 3, 10), 10);
        assert_eq!(rotation_seed(5, 5, 3, 10), 11);
        assert_eq!(rotation_seed(14, 5, 3, 10), 12);
        assert_eq!(rotation_seed(15, 5, 3, 10), 10);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let secret = dev_secret();
        let a = secret.derive(Some(3)).unwrap();
        let b = secret.derive(Some(3)).unwrap();
        let c = secret.derive(Some(4)).unwrap();
        let admin = secret.derive(None).unwrap();

        assert_eq!(a.account(), b.account());
        assert_ne!(a.account(), c.account());
        assert_ne!(a.account(), admin.account());
        assert_eq!(a.seed(), Some(3));
        assert_eq!(admin.seed(), None);
    }

    #[test]
    fn test_pool_window() {
        let secret = dev_secret();
        let pool = SignerPool::derive(&secret, 4, 3).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.first_seed(), 4);
        assert_eq!(pool.last_seed(), 6);
        assert!(pool.by_seed(3).is_none());
        assert!(pool.by_seed(7).is_none());

        let expected = secret.derive(Some(5)).unwrap();
        assert_eq!(pool.by_seed(5).unwrap().account(), expected.account());

        let seeds: Vec<_> = pool.iter().map(|s| s.seed().unwrap()).collect();
        assert_eq!(seeds, vec![4, 5, 6]);
    }

    #[test]
    fn test_pool_select_follows_rotation() {
        let pool = SignerPool::derive(&dev_secret(), 2, 3).unwrap();

        assert_eq!(pool.select(0, 2).seed(), Some(2));
        assert_eq!(pool.select(2, 2).seed(), Some(3));
        assert_eq!(pool.select(5, 2).seed(), Some(4));
        assert_eq!(pool.select(6, 2).seed(), Some(2));
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(SignerPool::derive(&dev_secret(), 0, 0).is_err());
    }

    #[test]
    fn test_window_past_seed_range_rejected() {
        let err = SignerPool::derive(&dev_secret(), u32::MAX - 2, 6).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let pool = SignerPool::derive(&dev_secret(), u32::MAX - 2, 2).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.last_seed(), u32::MAX - 1);
    }

    #[test]
    fn test_missing_secret_env() {
        let err = MasterSecret::from_env("POOL_MIGRATOR_TEST_UNSET_MNEMONIC").unwrap_err();
        assert!(matches!(err, Error::MissingEnvVar(_)));
    }

    #[test]
    fn test_secret_not_in_debug() {
        let secret = MasterSecret::new("word word word");
        assert!(!format!("{:?}", secret).contains("word"));
    }
}
