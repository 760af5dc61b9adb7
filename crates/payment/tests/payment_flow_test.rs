//! Full payment lifecycle against the in-process ledger.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use blockchain::mock::MockLedger;
use database::{ArchiveStore, InMemoryArchiveStore};
use keystore::{FileKeyStore, KeyStore};
use monitoring::{MonitorContext, MonitorRegistry, ToleranceRules};
use notification::MockWebhookDispatcher;
use payment::{PaymentError, PaymentRequest, PaymentService};
use rust_decimal::Decimal;
use shared::config::{ForwarderConfig, KeyStoreConfig};
use shared::models::{SessionStatus, SLIPPAGE_ERROR_MESSAGE};
use shared::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use tempfile::TempDir;

struct Forwarder {
    service: PaymentService,
    ledger: Arc<MockLedger>,
    keystore: Arc<FileKeyStore>,
    archive: Arc<InMemoryArchiveStore>,
    webhooks: Arc<MockWebhookDispatcher>,
    treasury: Pubkey,
    dir: TempDir,
}

async fn forwarder() -> Forwarder {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(MockLedger::new());
    let keystore = Arc::new(
        FileKeyStore::open(
            &KeyStoreConfig {
                dir: dir.path().join("wal"),
                encryption_key: Some("test key material".to_string()),
            },
            ledger.clone(),
        )
        .await
        .unwrap(),
    );
    let config = ForwarderConfig {
        forward_address: Pubkey::new_unique(),
        min_forward: Decimal::from_str("0.01").unwrap(),
        slippage_tolerance: Decimal::from_str("0.05").unwrap(),
        ignore_threshold: Decimal::from_str("0.02").unwrap(),
        payment_window: Duration::from_secs(1800),
        sweep_simulate: true,
    };
    let archive = Arc::new(InMemoryArchiveStore::new());
    let webhooks = Arc::new(MockWebhookDispatcher::new());
    let ctx = Arc::new(MonitorContext::new(
        &config,
        ledger.clone(),
        keystore.clone(),
        archive.clone(),
        webhooks.clone(),
    ));
    let service = PaymentService::new(&config, true, keystore.clone(), MonitorRegistry::new(ctx));

    Forwarder {
        service,
        ledger,
        keystore,
        archive,
        webhooks,
        treasury: config.forward_address,
        dir,
    }
}

fn request(amount: &str) -> PaymentRequest {
    PaymentRequest {
        amount: Decimal::from_str(amount).unwrap(),
        callback_uri: "http://127.0.0.1:9/hook".to_string(),
    }
}

#[tokio::test]
async fn test_payment_is_forwarded_and_reported() {
    let f = forwarder().await;
    let ticket = f.service.start(request("10")).await.unwrap();
    let address = Pubkey::from_str(&ticket.address).unwrap();
    assert!(f.ledger.wait_for_subscriber(&address).await);

    let payer = Pubkey::new_unique();
    f.ledger.deliver_transfer(payer, address, LAMPORTS_PER_SOL / 10);
    let signature = f.ledger.deliver_transfer(payer, address, 96 * LAMPORTS_PER_SOL / 10);

    let session = f.service.registry().wait(&ticket.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Settled);
    assert!(session.swept);

    let delivered = f.webhooks.delivered().await;
    assert_eq!(delivered.len(), 1);
    let (uri, result) = &delivered[0];
    assert_eq!(uri, "http://127.0.0.1:9/hook");
    assert_eq!(result.session_id, ticket.id);
    assert_eq!(result.transaction_signature, signature.to_string());
    assert_eq!(result.percent_of_desired, Decimal::from(96));
    assert_eq!(result.amount_sent, Decimal::from_str("9.6").unwrap());
    assert!(result.error.is_none());

    let archived = f.archive.find_by_session(ticket.id).await.unwrap().unwrap();
    assert_eq!(&archived, result);

    // the noise transfer is swept along with the payment
    let total = 97 * LAMPORTS_PER_SOL / 10;
    assert_eq!(f.ledger.balance(&f.treasury), total - f.ledger.fee());
    assert_eq!(f.ledger.simulation_count(), 1);
    assert!(f.keystore.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slipped_payment_carries_error() {
    let f = forwarder().await;
    let ticket = f.service.start(request("10")).await.unwrap();
    let address = Pubkey::from_str(&ticket.address).unwrap();
    assert!(f.ledger.wait_for_subscriber(&address).await);

    f.ledger.deliver_transfer(Pubkey::new_unique(), address, 94 * LAMPORTS_PER_SOL / 10);

    let session = f.service.registry().wait(&ticket.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Slipped);

    let (_, result) = f.webhooks.delivered().await.remove(0);
    assert_eq!(result.percent_of_desired, Decimal::from(94));
    assert_eq!(result.error.as_deref(), Some(SLIPPAGE_ERROR_MESSAGE));
}

#[tokio::test]
async fn test_persist_failure_aborts_start() {
    let f = forwarder().await;
    std::fs::remove_dir_all(f.dir.path().join("wal")).unwrap();

    let err = f.service.start(request("1")).await.unwrap_err();
    assert!(matches!(err, PaymentError::KeyStore(_)));
    assert_eq!(f.service.active_sessions(), 0);
}
