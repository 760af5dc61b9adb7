//! Append-only archive of payment outcomes.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::models::NotificationResult;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::DbPool;

/// Where settled and slipped outcomes are recorded for later audit.
///
/// Records are only ever appended; one per session.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn append(&self, record: &NotificationResult) -> anyhow::Result<()>;

    async fn find_by_session(&self, session_id: Uuid) -> anyhow::Result<Option<NotificationResult>>;

    async fn count(&self) -> anyhow::Result<u64>;
}

/// Postgres-backed archive using the `transactions` table.
pub struct PgArchiveStore {
    pool: DbPool,
}

impl PgArchiveStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_bigint(lamports: u64, field: &str) -> anyhow::Result<i64> {
    i64::try_from(lamports).with_context(|| format!("{} out of range: {}", field, lamports))
}

#[async_trait]
impl ArchiveStore for PgArchiveStore {
    async fn append(&self, record: &NotificationResult) -> anyhow::Result<()> {
        let client = self.pool.get().await?;

        let payload = serde_json::to_value(record)?;
        let time_sent = Utc
            .timestamp_opt(record.time_sent, 0)
            .single()
            .context("time_sent is not a valid timestamp")?;

        client
            .execute(
                "INSERT INTO transactions
                 (session_id, success, desired_amount, amount_sent, desired_lamports,
                  received_lamports, transaction_signature, address, time_sent,
                  percent_of_desired, slippage_error, payload)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &record.session_id,
                    &record.success,
                    &record.desired_amount,
                    &record.amount_sent,
                    &to_bigint(record.desired_lamports, "desired_lamports")?,
                    &to_bigint(record.received_lamports, "received_lamports")?,
                    &record.transaction_signature,
                    &record.address,
                    &time_sent,
                    &record.percent_of_desired,
                    &record.error,
                    &payload,
                ],
            )
            .await
            .with_context(|| format!("archiving session {}", record.session_id))?;

        tracing::debug!("Archived outcome for session {}", record.session_id);
        Ok(())
    }

    async fn find_by_session(&self, session_id: Uuid) -> anyhow::Result<Option<NotificationResult>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT payload FROM transactions WHERE session_id = $1",
                &[&session_id],
            )
            .await?;

        row.map(|row| {
            let payload: serde_json::Value = row.get(0);
            serde_json::from_value(payload).context("malformed archived payload")
        })
        .transpose()
    }

    async fn count(&self) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM transactions", &[]).await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }
}

/// Process-local archive, used when no database is configured.
#[derive(Default)]
pub struct InMemoryArchiveStore {
    records: RwLock<Vec<NotificationResult>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<NotificationResult> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn append(&self, record: &NotificationResult) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.session_id == record.session_id) {
            anyhow::bail!("session {} is already archived", record.session_id);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn find_by_session(&self, session_id: Uuid) -> anyhow::Result<Option<NotificationResult>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.session_id == session_id)
            .cloned())
    }

    async fn count(&self) -> anyhow::Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::PaymentSession;

    fn result() -> NotificationResult {
        let session = PaymentSession::new(
            10_000_000_000,
            "https://merchant.example/hook".to_string(),
            "11111111111111111111111111111111".to_string(),
            chrono::Duration::minutes(30),
        );
        NotificationResult::new(&session, 9_600_000_000, "sig".to_string(), false)
    }

    #[tokio::test]
    async fn test_in_memory_append_and_find() {
        let store = InMemoryArchiveStore::new();
        let record = result();

        store.append(&record).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.find_by_session(record.session_id).await.unwrap(), Some(record));
        assert!(store.find_by_session(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_rejects_second_record_for_session() {
        let store = InMemoryArchiveStore::new();
        let record = result();

        store.append(&record).await.unwrap();
        assert!(store.append(&record).await.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[test]
    fn test_bigint_range() {
        assert_eq!(to_bigint(42, "x").unwrap(), 42);
        assert!(to_bigint(u64::MAX, "x").is_err());
    }
}
