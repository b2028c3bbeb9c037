//! Error types for the migration jobs

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the migration jobs
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Key handling errors
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    // RPC errors
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    // Submission errors
    #[error("Transaction submission failed: {0}")]
    Submission(String),

    // Funding errors
    #[error(
        "Signer {address} is under-funded: balance {balance} is below the required {required}"
    )]
    FundingShortfall {
        address: String,
        balance: u128,
        required: u128,
    },
}

impl Error {
    /// Check if this error means the node is unreachable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::RpcConnection(_))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::FundingShortfall { .. } => 1,
            _ => 2,
        }
    }
}

/// Process exit code for an error surfaced by a command
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map(Error::exit_code)
        .unwrap_or(2)
}

// Conversion from SCALE codec errors
impl From<subxt::ext::codec::Error> for Error {
    fn from(e: subxt::ext::codec::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
