use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use keystore::DisposableKey;
use shared::models::{PaymentSession, SessionStatus};
use solana_sdk::pubkey::Pubkey;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::monitor::{MonitorContext, MonitorOutcome, PaymentMonitor};

struct SessionEntry {
    session: PaymentSession,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Supervised set of in-flight payment monitors, keyed by session id.
///
/// Every monitor runs as its own task under a child of one root
/// cancellation token, so sessions can be listed, cancelled one by one or
/// shut down together.
#[derive(Clone)]
pub struct MonitorRegistry {
    ctx: Arc<MonitorContext>,
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
    root: CancellationToken,
}

impl MonitorRegistry {
    pub fn new(ctx: Arc<MonitorContext>) -> Self {
        Self {
            ctx,
            sessions: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &Arc<MonitorContext> {
        &self.ctx
    }

    /// Start watching `session` in the background. The monitor owns `key`
    /// from here on.
    pub fn register(&self, session: PaymentSession, key: DisposableKey) {
        let id = session.id;
        let cancel = self.root.child_token();
        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default();
        let deadline = Instant::now() + remaining;

        self.sessions.insert(
            id,
            SessionEntry {
                session: session.clone(),
                cancel: cancel.clone(),
                handle: None,
                finished_at: None,
            },
        );

        let monitor = PaymentMonitor::new(self.ctx.clone(), session, key, cancel, deadline);
        let sessions = self.sessions.clone();
        let handle = tokio::spawn(async move {
            let outcome = monitor.run().await;
            record_outcome(&sessions, id, &outcome);
        });

        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.handle = Some(handle);
        }
        debug!("Registered monitor for session {} ({:?} window)", id, remaining);
    }

    /// Snapshot of a session, pending or finished.
    pub fn get(&self, id: &Uuid) -> Option<PaymentSession> {
        self.sessions.get(id).map(|entry| entry.session.clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.session.status.is_terminal())
            .count()
    }

    pub fn list_active(&self) -> Vec<PaymentSession> {
        self.sessions
            .iter()
            .filter(|entry| !entry.session.status.is_terminal())
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Status of the session that owns `address`, if this process knows it.
    pub fn status_of_address(&self, address: &Pubkey) -> Option<SessionStatus> {
        let address = address.to_string();
        self.sessions
            .iter()
            .find(|entry| entry.session.disposable_address == address)
            .map(|entry| entry.session.status)
    }

    /// Signal a pending session to stop. Returns false for unknown or
    /// already finished sessions.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.sessions.get(id) {
            Some(entry) if !entry.session.status.is_terminal() => {
                info!("Cancelling session {}", id);
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for a session's monitor to finish and return its final snapshot.
    pub async fn wait(&self, id: &Uuid) -> Option<PaymentSession> {
        let handle = self.sessions.get_mut(id)?.handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Monitor task for session {} ended abnormally: {}", id, e);
            }
        }
        self.get(id)
    }

    /// Cancel every monitor and wait for all of them to release their
    /// subscriptions.
    pub async fn shutdown(&self) {
        info!("Shutting down {} active monitor(s)", self.active_count());
        self.root.cancel();

        let handles: Vec<(Uuid, JoinHandle<()>)> = self
            .sessions
            .iter_mut()
            .filter_map(|mut entry| {
                let id = *entry.key();
                entry.handle.take().map(|handle| (id, handle))
            })
            .collect();

        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!("Monitor task for session {} ended abnormally: {}", id, e);
            }
        }
        info!("All monitors stopped");
    }

    /// Forget finished sessions older than `retention`.
    pub fn prune(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.finished_at.map_or(true, |at| at > cutoff));
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!("Pruned {} finished session(s)", pruned);
        }
        pruned
    }

    /// Prune finished sessions on `interval` until `shutdown` fires.
    pub async fn run_pruner(
        self,
        interval: std::time::Duration,
        retention: chrono::Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.prune(retention);
                }
            }
        }
        debug!("Session pruner stopped");
    }
}

fn record_outcome(sessions: &DashMap<Uuid, SessionEntry>, id: Uuid, outcome: &MonitorOutcome) {
    let Some(mut entry) = sessions.get_mut(&id) else {
        warn!("Monitor for unknown session {} finished", id);
        return;
    };

    let session = &mut entry.session;
    if let Err(e) = session.transition(outcome.status()) {
        warn!("Session {}: {}", id, e);
        return;
    }
    match outcome {
        MonitorOutcome::Matched { sweep, .. } => session.swept = sweep.is_some(),
        MonitorOutcome::Failed(reason) => session.failure_reason = Some(reason.clone()),
        MonitorOutcome::Expired => {}
    }
    info!("Session {} finished as {}", id, session.status);
    entry.finished_at = Some(Utc::now());
}
