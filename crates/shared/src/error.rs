use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Solana RPC error: {0}")]
    SolanaRpc(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Invalid wallet address: {0}")]
    InvalidWalletAddress(String),

    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid session status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transport-level failures talking to the ledger.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::SolanaRpc(_) | Error::Subscription(_) | Error::CircuitBreakerOpen(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
