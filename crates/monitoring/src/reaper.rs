use std::sync::Arc;
use std::time::Duration;

use blockchain::TransactionError;
use keystore::KeyStoreError;
use shared::models::SessionStatus;
use solana_sdk::pubkey::Pubkey;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::MonitorContext;
use crate::registry::MonitorRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub swept: usize,
    pub disposed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum SlotAction {
    Swept,
    Disposed,
    Skipped,
}

/// Periodically recovers funds that reach disposable wallets after their
/// session stopped watching, and removes slots left behind.
///
/// A slot is only touched once no pending session owns it and it is older
/// than `min_age`, so slots from a previous run are handled after a
/// restart too.
pub struct ExpiredWalletReaper {
    registry: MonitorRegistry,
    ctx: Arc<MonitorContext>,
    min_age: Duration,
}

impl ExpiredWalletReaper {
    pub fn new(registry: MonitorRegistry, min_age: Duration) -> Self {
        let ctx = registry.context().clone();
        Self {
            registry,
            ctx,
            min_age,
        }
    }

    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!("Starting expired wallet reaper, interval {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.reap_once().await;
                    if report.swept + report.disposed + report.failed > 0 {
                        info!(
                            "Reaper pass: {} swept, {} disposed, {} skipped, {} failed",
                            report.swept, report.disposed, report.skipped, report.failed
                        );
                    }
                }
            }
        }
        info!("Expired wallet reaper stopped");
    }

    /// One pass over every persisted slot. Errors are logged and the slot is
    /// retried on the next pass.
    pub async fn reap_once(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let addresses = match self.ctx.keystore.list().await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!("Reaper could not list key slots: {}", e);
                report.failed += 1;
                return report;
            }
        };

        for address in addresses {
            match self.reap(&address).await {
                Ok(SlotAction::Swept) => {
                    report.swept += 1;
                    report.disposed += 1;
                }
                Ok(SlotAction::Disposed) => report.disposed += 1,
                Ok(SlotAction::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!("Reaper failed on {}: {}", address, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn reap(&self, address: &Pubkey) -> Result<SlotAction, KeyStoreError> {
        if self.registry.status_of_address(address) == Some(SessionStatus::Pending) {
            return Ok(SlotAction::Skipped);
        }
        if self.ctx.keystore.slot_age(address).await? < self.min_age {
            return Ok(SlotAction::Skipped);
        }

        let mut key = self.ctx.keystore.load_address(address).await?;
        let balance = self.ctx.gateway.balance_of(address).await?;

        let action = if balance > 0 {
            match self.ctx.sweep(&key).await {
                Ok(receipt) => {
                    info!(
                        "Recovered {} lamports from {} ({})",
                        receipt.swept_lamports, address, receipt.signature
                    );
                    SlotAction::Swept
                }
                Err(TransactionError::InsufficientFunds { balance, fee }) => {
                    debug!("Leaving dust of {} lamports in {} (fee {})", balance, address, fee);
                    return Ok(SlotAction::Skipped);
                }
                Err(e) => {
                    return Err(KeyStoreError::Ledger(shared::Error::TransactionFailed(format!(
                        "sweep failed: {}",
                        e
                    ))))
                }
            }
        } else {
            SlotAction::Disposed
        };

        self.ctx.keystore.dispose(&mut key).await?;
        Ok(action)
    }
}
