//! Per-session watcher: waits for a qualifying transfer into the
//! disposable address, then archives, notifies, sweeps and disposes.

use std::sync::Arc;

use blockchain::{LedgerGateway, LogSubscription, SweepReceipt, TransactionBuilder, TransactionError};
use database::ArchiveStore;
use keystore::{DisposableKey, KeyStore};
use notification::WebhookDispatcher;
use shared::config::ForwarderConfig;
use shared::models::{NotificationResult, PaymentSession, SessionStatus};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tolerance::{Decision, ToleranceRules};

/// Collaborators shared by every monitor and the reaper.
pub struct MonitorContext {
    pub gateway: Arc<dyn LedgerGateway>,
    pub keystore: Arc<dyn KeyStore>,
    pub archive: Arc<dyn ArchiveStore>,
    pub webhooks: Arc<dyn WebhookDispatcher>,
    pub rules: ToleranceRules,
    /// Where received funds are swept
    pub treasury: Pubkey,
    pub simulate_sweep: bool,
}

impl MonitorContext {
    pub fn new(
        config: &ForwarderConfig,
        gateway: Arc<dyn LedgerGateway>,
        keystore: Arc<dyn KeyStore>,
        archive: Arc<dyn ArchiveStore>,
        webhooks: Arc<dyn WebhookDispatcher>,
    ) -> Self {
        Self {
            gateway,
            keystore,
            archive,
            webhooks,
            rules: ToleranceRules::from_config(config),
            treasury: config.forward_address,
            simulate_sweep: config.sweep_simulate,
        }
    }

    /// Move the whole balance of `key` to the treasury.
    pub async fn sweep(&self, key: &DisposableKey) -> Result<SweepReceipt, TransactionError> {
        let keypair = key.keypair().ok_or_else(|| {
            TransactionError::Signing(format!("key {} is already disposed", key.address()))
        })?;
        TransactionBuilder::new(self.gateway.clone())
            .sweep_all(keypair, &self.treasury, self.simulate_sweep)
            .await
    }
}

/// How a monitor finished.
#[derive(Debug, Clone)]
pub enum MonitorOutcome {
    /// A qualifying transfer arrived. `sweep` is `None` when the funds could
    /// not be moved to the treasury.
    Matched {
        status: SessionStatus,
        result: NotificationResult,
        sweep: Option<SweepReceipt>,
    },
    /// Deadline reached or cancelled without a qualifying transfer
    Expired,
    /// Ledger transport failure
    Failed(String),
}

impl MonitorOutcome {
    pub fn status(&self) -> SessionStatus {
        match self {
            MonitorOutcome::Matched { status, .. } => *status,
            MonitorOutcome::Expired => SessionStatus::Expired,
            MonitorOutcome::Failed(_) => SessionStatus::Failed,
        }
    }
}

enum Watch {
    Matched {
        decision: Decision,
        received: u64,
        signature: Signature,
    },
    Expired,
    Failed(String),
}

pub struct PaymentMonitor {
    ctx: Arc<MonitorContext>,
    session: PaymentSession,
    key: DisposableKey,
    cancel: CancellationToken,
    deadline: Instant,
}

impl PaymentMonitor {
    pub fn new(
        ctx: Arc<MonitorContext>,
        session: PaymentSession,
        key: DisposableKey,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Self {
        Self {
            ctx,
            session,
            key,
            cancel,
            deadline,
        }
    }

    /// Watch until the first qualifying transfer, the deadline, a cancel or a
    /// transport failure. The log subscription is released on every path.
    pub async fn run(self) -> MonitorOutcome {
        let address = self.key.address();
        info!("Watching {} for session {}", address, self.session.id);

        let subscribe = self
            .ctx
            .gateway
            .subscribe_logs(&address, CommitmentConfig::confirmed());
        let subscribed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = sleep_until(self.deadline) => None,
            result = subscribe => Some(result),
        };

        let mut subscription = match subscribed {
            Some(Ok(subscription)) => subscription,
            Some(Err(e)) => {
                error!("Session {} could not subscribe to {}: {}", self.session.id, address, e);
                return MonitorOutcome::Failed(e.to_string());
            }
            None => {
                info!("Session {} ended before its subscription opened", self.session.id);
                return MonitorOutcome::Expired;
            }
        };

        let watched = self.watch(&mut subscription).await;
        subscription.close().await;

        match watched {
            Watch::Matched {
                decision,
                received,
                signature,
            } => self.settle(decision, received, signature).await,
            Watch::Expired => MonitorOutcome::Expired,
            Watch::Failed(reason) => MonitorOutcome::Failed(reason),
        }
    }

    async fn watch(&self, subscription: &mut LogSubscription) -> Watch {
        let address = self.key.address();
        let id = self.session.id;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Session {} cancelled", id);
                    return Watch::Expired;
                }
                _ = sleep_until(self.deadline) => {
                    info!("Session {} expired without a qualifying payment", id);
                    return Watch::Expired;
                }
                next = subscription.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    error!("Log subscription for session {} failed: {}", id, e);
                    return Watch::Failed(e.to_string());
                }
                None => {
                    error!("Log subscription for session {} closed unexpectedly", id);
                    return Watch::Failed("log subscription closed".to_string());
                }
            };

            if let Some(err) = &event.error {
                debug!("Skipping failed transaction {}: {}", event.signature, err);
                continue;
            }

            let transaction = match self.ctx.gateway.fetch_transaction(&event.signature).await {
                Ok(Some(tx)) if !tx.failed() => tx,
                Ok(Some(_)) => {
                    debug!("Transaction {} failed on chain, skipping", event.signature);
                    continue;
                }
                Ok(None) => {
                    debug!("Transaction {} not found, skipping", event.signature);
                    continue;
                }
                Err(e) => {
                    error!("Fetching {} for session {} failed: {}", event.signature, id, e);
                    return Watch::Failed(e.to_string());
                }
            };

            let received = transaction.lamports_to(&address);
            if received == 0 {
                debug!("Transaction {} moved no lamports into {}", event.signature, address);
                continue;
            }

            match self.ctx.rules.evaluate(self.session.desired_lamports, received) {
                Decision::Ignore => {
                    debug!(
                        "Ignoring {} lamports into {} for session {} as noise",
                        received, address, id
                    );
                }
                decision => {
                    if let Some(sender) = transaction.sender_to(&address) {
                        info!(
                            "Session {} matched {} lamports from {} in {}",
                            id, received, sender, event.signature
                        );
                    }
                    return Watch::Matched {
                        decision,
                        received,
                        signature: event.signature,
                    }
                }
            }
        }
    }

    async fn settle(mut self, decision: Decision, received: u64, signature: Signature) -> MonitorOutcome {
        let slipped = decision == Decision::Slipped;
        let status = if slipped {
            SessionStatus::Slipped
        } else {
            SessionStatus::Settled
        };
        let result = NotificationResult::new(&self.session, received, signature.to_string(), slipped);
        let id = self.session.id;

        info!(
            "Session {} {}: received {} of {} lamports ({}%) in {}",
            id, status, received, self.session.desired_lamports, result.percent_of_desired, signature
        );

        if let Err(e) = self.ctx.archive.append(&result).await {
            warn!("Failed to archive outcome for session {}: {:#}", id, e);
        }
        if let Err(e) = self
            .ctx
            .webhooks
            .dispatch(&self.session.callback_uri, &result)
            .await
        {
            warn!("Failed to notify {} for session {}: {}", self.session.callback_uri, id, e);
        }

        let sweep = match self.ctx.sweep(&self.key).await {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                error!(
                    "Sweep for session {} failed, funds remain in {}: {}",
                    id,
                    self.key.address(),
                    e
                );
                None
            }
        };

        if sweep.is_some() {
            if let Err(e) = self.ctx.keystore.dispose(&mut self.key).await {
                warn!("Failed to dispose key {} for session {}: {}", self.key.address(), id, e);
            }
        }

        MonitorOutcome::Matched {
            status,
            result,
            sweep,
        }
    }
}
