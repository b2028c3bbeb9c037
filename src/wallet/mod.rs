//! Signer management
//!
//! Provides the admin + rotating signer pool architecture:
//! - Identity derivation from the master secret (`keyring`)
//! - Deterministic seed rotation across a fixed signer window
//! - Funding and sweeping of the pool from the admin account (`funding`)
//!
//! # Architecture
//!
//! ```text
//! MasterSecret → SignerPool ──→ BatchDispatcher (select by rotation)
//!      ↓             ↑
//!    admin → SignerFunding (top-up / sweep)
//! ```

pub mod funding;
pub mod keyring;

pub use funding::{FundingReport, FundingSettings, SignerFunding};
pub use keyring::{rotation_seed, Identity, MasterSecret, SignerPool};
