use database::{create_pool, run_migrations, ArchiveStore, PgArchiveStore};
use shared::models::{NotificationResult, PaymentSession};

async fn archive() -> PgArchiveStore {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for migration tests");

    let pool = create_pool(&database_url, 5)
        .await
        .expect("Failed to create database pool");
    run_migrations(&pool).await.expect("Migrations failed");
    PgArchiveStore::new(pool)
}

#[tokio::test]
#[ignore] // Only run with DATABASE_URL set
async fn test_migrations_are_repeatable() {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for migration tests");
    let pool = create_pool(&database_url, 5).await.unwrap();

    run_migrations(&pool).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let client = pool.get().await.unwrap();
    let row = client
        .query_one(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'transactions'",
            &[],
        )
        .await
        .unwrap();
    let count: i64 = row.get(0);
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore] // Only run with DATABASE_URL set
async fn test_archive_round_trip() {
    let store = archive().await;
    let session = PaymentSession::new(
        10_000_000_000,
        "https://merchant.example/hook".to_string(),
        "11111111111111111111111111111111".to_string(),
        chrono::Duration::minutes(30),
    );
    let record = NotificationResult::new(&session, 9_400_000_000, "sig".to_string(), true);

    store.append(&record).await.unwrap();
    let found = store.find_by_session(session.id).await.unwrap().unwrap();
    assert_eq!(found, record);

    // session_id is unique, archive is append-only
    assert!(store.append(&record).await.is_err());
}

#[tokio::test]
#[ignore] // Only run with DATABASE_URL set
async fn test_archive_accepts_large_overpayment() {
    let store = archive().await;
    let session = PaymentSession::new(
        10_000_000,
        "https://merchant.example/hook".to_string(),
        "11111111111111111111111111111111".to_string(),
        chrono::Duration::minutes(30),
    );
    // 100 SOL against a 0.01 SOL request
    let record = NotificationResult::new(&session, 100_000_000_000, "sig-large".to_string(), false);
    assert!(record.percent_of_desired > rust_decimal::Decimal::from(999_999));

    store.append(&record).await.unwrap();
    let found = store.find_by_session(session.id).await.unwrap().unwrap();
    assert_eq!(found.percent_of_desired, record.percent_of_desired);
}
