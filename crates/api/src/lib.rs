pub mod error;
pub mod handlers;
pub mod logging;
pub mod qr;
pub mod rate_limit;
pub mod routes;
pub mod security;

use blockchain::LedgerGateway;
use payment::PaymentService;
use std::sync::Arc;

pub use error::{ApiError, ApiResult};
pub use rate_limit::RateLimiter;

/// Shared application state
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        payments: Arc<PaymentService>,
        ledger: Arc<dyn LedgerGateway>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            payments,
            ledger,
            rate_limiter,
        }
    }
}
