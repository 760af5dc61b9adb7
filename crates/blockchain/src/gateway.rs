//! The ledger operations the forwarder depends on.

use async_trait::async_trait;
use shared::Result;
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, message::Message, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::{LogEvent, ParsedTransaction, SimulationOutcome};

/// Options applied when submitting a signed transaction.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
    pub commitment: CommitmentConfig,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

/// Capability interface over a ledger node.
///
/// Implementations must be safe to share between many payment monitors at once.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Balance of `address` in lamports.
    async fn balance_of(&self, address: &Pubkey) -> Result<u64>;

    /// Blockhash anchoring a new transaction's validity window.
    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Network fee for `message`, `None` when the node cannot price it.
    async fn estimate_fee(&self, message: &Message) -> Result<Option<u64>>;

    async fn submit(&self, transaction: &Transaction, options: SubmitOptions) -> Result<Signature>;

    async fn simulate(&self, transaction: &Transaction) -> Result<SimulationOutcome>;

    /// Stream log notifications for transactions mentioning `address`.
    async fn subscribe_logs(
        &self,
        address: &Pubkey,
        commitment: CommitmentConfig,
    ) -> Result<LogSubscription>;

    /// Look up a confirmed transaction. `Ok(None)` when the node does not know it.
    async fn fetch_transaction(&self, signature: &Signature) -> Result<Option<ParsedTransaction>>;
}

/// A live log subscription.
///
/// The server-side subscription is released when this value is closed or
/// dropped, whichever comes first.
pub struct LogSubscription {
    events: mpsc::Receiver<Result<LogEvent>>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl LogSubscription {
    pub fn new(
        events: mpsc::Receiver<Result<LogEvent>>,
        cancel: CancellationToken,
        driver: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            events,
            cancel,
            driver,
        }
    }

    /// Wait for the next notification. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<LogEvent>> {
        self.events.recv().await
    }

    /// Release the subscription and wait for the driver to finish unsubscribing.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
