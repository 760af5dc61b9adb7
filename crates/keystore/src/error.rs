use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeyStoreError>;

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cannot dispose {address}: balance is {lamports} lamports")]
    NonZeroBalance { address: String, lamports: u64 },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] shared::Error),
}
