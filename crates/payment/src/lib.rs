use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keystore::KeyStore;
use monitoring::MonitorRegistry;
use rust_decimal::Decimal;
use serde::Serialize;
use shared::config::ForwarderConfig;
use shared::models::PaymentSession;
use shared::{lamports_to_sol, sol_to_lamports};
use tracing::{error, info};
use uuid::Uuid;

pub mod callback;
pub mod error;

pub use callback::normalize_callback_uri;
pub use error::{PaymentError, Result};

/// A request to forward `amount` SOL and report back to `callback_uri`.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub callback_uri: String,
}

/// What the payer needs to complete a payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentTicket {
    pub id: Uuid,
    pub address: String,
    /// SOL, exact to the lamport
    pub amount: Decimal,
    pub desired_lamports: u64,
    pub expires_at: DateTime<Utc>,
}

impl From<&PaymentSession> for PaymentTicket {
    fn from(session: &PaymentSession) -> Self {
        Self {
            id: session.id,
            address: session.disposable_address.clone(),
            amount: lamports_to_sol(session.desired_lamports),
            desired_lamports: session.desired_lamports,
            expires_at: session.expires_at,
        }
    }
}

/// Starts payment sessions: one fresh disposable wallet and one background
/// monitor per request.
pub struct PaymentService {
    keystore: Arc<dyn KeyStore>,
    registry: MonitorRegistry,
    min_forward_lamports: u64,
    payment_window: Duration,
    allow_local_callbacks: bool,
}

impl PaymentService {
    pub fn new(
        config: &ForwarderConfig,
        allow_local_callbacks: bool,
        keystore: Arc<dyn KeyStore>,
        registry: MonitorRegistry,
    ) -> Self {
        info!(
            "Payment service ready: minimum {} SOL, window {:?}",
            config.min_forward, config.payment_window
        );
        Self {
            keystore,
            registry,
            min_forward_lamports: config.min_forward_lamports(),
            payment_window: config.payment_window,
            allow_local_callbacks,
        }
    }

    /// Validate the request, create and persist a disposable key, and start
    /// watching it. Returns as soon as the monitor is spawned.
    pub async fn start(&self, request: PaymentRequest) -> Result<PaymentTicket> {
        let desired_lamports = self.validate_amount(request.amount)?;
        let callback_uri =
            normalize_callback_uri(&request.callback_uri, self.allow_local_callbacks).await?;
        let window = chrono::Duration::from_std(self.payment_window)
            .map_err(|e| PaymentError::ConfigError(format!("payment window out of range: {}", e)))?;

        let key = self.keystore.create();
        if let Err(e) = self.keystore.persist(&key).await {
            error!("Failed to persist key {}, aborting session: {}", key.address(), e);
            return Err(e.into());
        }

        let session = PaymentSession::new(desired_lamports, callback_uri, key.address().to_string(), window);
        let ticket = PaymentTicket::from(&session);
        info!(
            "Started session {} for {} SOL at {}, expires {}",
            ticket.id, ticket.amount, ticket.address, ticket.expires_at
        );

        self.registry.register(session, key);
        Ok(ticket)
    }

    fn validate_amount(&self, amount: Decimal) -> Result<u64> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!("{} is not positive", amount)));
        }
        let lamports = sol_to_lamports(amount).map_err(|e| PaymentError::InvalidAmount(e.to_string()))?;
        if lamports == 0 || lamports < self.min_forward_lamports {
            return Err(PaymentError::InvalidAmount(format!(
                "{} is below the minimum of {}",
                amount,
                lamports_to_sol(self.min_forward_lamports)
            )));
        }
        Ok(lamports)
    }

    pub fn session(&self, id: &Uuid) -> Option<PaymentSession> {
        self.registry.get(id)
    }

    pub fn cancel(&self, id: &Uuid) -> bool {
        self.registry.cancel(id)
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }

    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockchain::mock::MockLedger;
    use database::InMemoryArchiveStore;
    use keystore::FileKeyStore;
    use monitoring::{MonitorContext, ToleranceRules};
    use notification::MockWebhookDispatcher;
    use shared::config::KeyStoreConfig;
    use shared::models::SessionStatus;
    use solana_sdk::pubkey::Pubkey;
    use std::collections::HashSet;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn forwarder() -> ForwarderConfig {
        ForwarderConfig {
            forward_address: Pubkey::new_unique(),
            min_forward: Decimal::from_str("0.01").unwrap(),
            slippage_tolerance: Decimal::from_str("0.05").unwrap(),
            ignore_threshold: Decimal::from_str("0.02").unwrap(),
            payment_window: Duration::from_secs(1800),
            sweep_simulate: false,
        }
    }

    async fn service() -> (PaymentService, Arc<MockLedger>, Arc<FileKeyStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let keystore = Arc::new(
            FileKeyStore::open(
                &KeyStoreConfig {
                    dir: dir.path().to_path_buf(),
                    encryption_key: None,
                },
                ledger.clone(),
            )
            .await
            .unwrap(),
        );
        let config = forwarder();
        let ctx = Arc::new(MonitorContext {
            gateway: ledger.clone(),
            keystore: keystore.clone(),
            archive: Arc::new(InMemoryArchiveStore::new()),
            webhooks: Arc::new(MockWebhookDispatcher::new()),
            rules: ToleranceRules::from_config(&config),
            treasury: config.forward_address,
            simulate_sweep: false,
        });
        let service = PaymentService::new(&config, true, keystore.clone(), MonitorRegistry::new(ctx));
        (service, ledger, keystore, dir)
    }

    fn request(amount: &str) -> PaymentRequest {
        PaymentRequest {
            amount: Decimal::from_str(amount).unwrap(),
            callback_uri: "http://127.0.0.1:9/hook".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_returns_pending_ticket() {
        let (service, _ledger, keystore, _dir) = service().await;
        let ticket = service.start(request("1.5")).await.unwrap();

        assert_eq!(ticket.amount, Decimal::from_str("1.5").unwrap());
        assert_eq!(ticket.desired_lamports, 1_500_000_000);
        let address = Pubkey::from_str(&ticket.address).unwrap();
        assert!(keystore.slot_path(&address).exists());

        let session = service.session(&ticket.id).unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        let window = (ticket.expires_at - session.created_at).num_seconds();
        assert_eq!(window, 1800);
        assert_eq!(service.active_sessions(), 1);
        service.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_bad_amounts_without_side_effects() {
        let (service, _ledger, keystore, _dir) = service().await;
        for amount in ["0", "-1", "0.009", "0.0000000001"] {
            let err = service.start(request(amount)).await.unwrap_err();
            assert!(matches!(err, PaymentError::InvalidAmount(_)), "{}", amount);
        }
        assert!(keystore.list().await.unwrap().is_empty());
        assert_eq!(service.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_minimum_amount_accepted() {
        let (service, _ledger, _keystore, _dir) = service().await;
        assert!(service.start(request("0.01")).await.is_ok());
        service.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_addresses_are_never_reused() {
        let (service, _ledger, _keystore, _dir) = service().await;
        let mut seen = HashSet::new();
        for _ in 0..25 {
            let ticket = service.start(request("0.5")).await.unwrap();
            assert!(seen.insert(ticket.address));
        }
        service.registry().shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_callback_rejected_before_key_creation() {
        let (service, _ledger, keystore, _dir) = service().await;
        let err = service
            .start(PaymentRequest {
                amount: Decimal::ONE,
                callback_uri: "ftp://example.com".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidCallbackUri(_)));
        assert!(keystore.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_expires_session() {
        let (service, ledger, _keystore, _dir) = service().await;
        let ticket = service.start(request("1")).await.unwrap();
        let address = Pubkey::from_str(&ticket.address).unwrap();
        assert!(ledger.wait_for_subscriber(&address).await);

        assert!(service.cancel(&ticket.id));
        let session = service.registry().wait(&ticket.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Expired);
    }
}
