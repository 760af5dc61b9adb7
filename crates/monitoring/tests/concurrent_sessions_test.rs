//! Many sessions watched at once through the registry.

use std::collections::HashSet;
use std::sync::Arc;

use blockchain::mock::MockLedger;
use database::{ArchiveStore, InMemoryArchiveStore};
use keystore::{FileKeyStore, KeyStore};
use monitoring::{MonitorContext, MonitorRegistry, ToleranceRules};
use notification::MockWebhookDispatcher;
use rust_decimal::Decimal;
use shared::config::KeyStoreConfig;
use shared::models::{PaymentSession, SessionStatus};
use shared::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use tempfile::TempDir;

const SESSIONS: usize = 20;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_settle_independently() {
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
    let archive = Arc::new(InMemoryArchiveStore::new());
    let webhooks = Arc::new(MockWebhookDispatcher::new());
    let treasury = Pubkey::new_unique();
    let registry = MonitorRegistry::new(Arc::new(MonitorContext {
        gateway: ledger.clone(),
        keystore: keystore.clone(),
        archive: archive.clone(),
        webhooks: webhooks.clone(),
        rules: ToleranceRules::new(Decimal::new(2, 2), Decimal::new(5, 2)),
        treasury,
        simulate_sweep: false,
    }));

    let mut started = Vec::new();
    for _ in 0..SESSIONS {
        let key = keystore.create();
        keystore.persist(&key).await.unwrap();
        let address = key.address();
        let session = PaymentSession::new(
            LAMPORTS_PER_SOL,
            "https://merchant.example/hook".to_string(),
            address.to_string(),
            chrono::Duration::minutes(30),
        );
        started.push((session.id, address));
        registry.register(session, key);
    }

    let unique: HashSet<_> = started.iter().map(|(_, address)| *address).collect();
    assert_eq!(unique.len(), SESSIONS);
    assert_eq!(registry.active_count(), SESSIONS);

    // every other session is paid short of the slippage band
    for (i, (_, address)) in started.iter().enumerate() {
        assert!(ledger.wait_for_subscriber(address).await);
        let amount = if i % 2 == 0 {
            LAMPORTS_PER_SOL
        } else {
            LAMPORTS_PER_SOL / 2
        };
        ledger.deliver_transfer(Pubkey::new_unique(), *address, amount);
    }

    for (i, (id, address)) in started.iter().enumerate() {
        let session = registry.wait(id).await.unwrap();
        let expected = if i % 2 == 0 {
            SessionStatus::Settled
        } else {
            SessionStatus::Slipped
        };
        assert_eq!(session.status, expected);
        assert!(session.swept);
        assert_eq!(ledger.balance(address), 0);
        assert!(!keystore.slot_path(address).exists());
    }

    assert_eq!(archive.count().await.unwrap(), SESSIONS as u64);
    assert_eq!(webhooks.delivered().await.len(), SESSIONS);
    assert_eq!(ledger.active_subscriptions(), 0);

    let fee = ledger.fee();
    let expected_treasury: u64 = (0..SESSIONS)
        .map(|i| if i % 2 == 0 { LAMPORTS_PER_SOL } else { LAMPORTS_PER_SOL / 2 } - fee)
        .sum();
    assert_eq!(ledger.balance(&treasury), expected_treasury);
}
