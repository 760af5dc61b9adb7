use keystore::KeyStoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid callback uri: {0}")]
    InvalidCallbackUri(String),

    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, PaymentError>;
