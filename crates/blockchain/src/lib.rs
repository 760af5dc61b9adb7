pub mod circuit_breaker;
pub mod client;
pub mod gateway;
pub mod rate_limiter;
pub mod retry;
pub mod transaction;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::SolanaClient;
pub use gateway::{LedgerGateway, LogSubscription, SubmitOptions};
pub use rate_limiter::RpcRateLimiter;
pub use retry::{retry_with_backoff, retry_with_backoff_if, RetryConfig};
pub use transaction::{
    OverboardReason, SweepReceipt, TransactionBuilder, TransactionBundle, TransactionError,
    TransferInstruction, MAX_COMPUTE_UNITS, MAX_INSTRUCTIONS, MAX_SIGNERS, MAX_TRANSACTION_SIZE,
};
pub use types::*;
