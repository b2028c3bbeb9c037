//! Migration pipeline
//!
//! ```text
//! ChainClient::keys(collection) ──► MigrationScanner ──► MigrationCheck
//!                                          │               (per-key predicates)
//!                                          ▼
//!                                   BatchDispatcher ──► SignerPool::select
//!                                          │
//!                                          ▼
//!                              ChainClient::submit / submit_batch
//! ```
//!
//! Scans are sequential. Each phase owns its `ScanState`; the dispatcher and
//! its rotation counter are shared by all phases of a job.

pub mod checks;
pub mod dispatcher;
pub mod progress;
pub mod scanner;

pub use checks::{CurrencyMigration, MemberMigration, PoolMigration};
pub use dispatcher::{BatchDispatcher, DispatchSettings, DispatchStats};
pub use progress::ProgressReporter;
pub use scanner::{
    Classification, MigrationCheck, MigrationScanner, Outcome, ScanOptions, ScanState,
};
