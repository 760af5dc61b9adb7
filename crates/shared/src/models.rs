use crate::amount::{lamports_to_sol, percent_of};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Message attached to notifications for payments that fell short of the slippage band.
pub const SLIPPAGE_ERROR_MESSAGE: &str =
    "Transaction has slipped threshold, user has not sent enough funds.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Settled,
    Slipped,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Settled => "settled",
            SessionStatus::Slipped => "slipped",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One payment request and its disposable receiving address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: Uuid,
    pub desired_lamports: u64,
    pub callback_uri: String,
    pub disposable_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    /// Whether the received funds reached the treasury
    pub swept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PaymentSession {
    pub fn new(
        desired_lamports: u64,
        callback_uri: String,
        disposable_address: String,
        window: chrono::Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            desired_lamports,
            callback_uri,
            disposable_address,
            created_at,
            expires_at: created_at + window,
            status: SessionStatus::Pending,
            swept: false,
            failure_reason: None,
        }
    }

    pub fn desired_sol(&self) -> Decimal {
        lamports_to_sol(self.desired_lamports)
    }

    /// Move the session to a terminal status. Only a pending session can transition.
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if self.status.is_terminal() || !to.is_terminal() {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Outcome of a settled or slipped session. Sent to the caller's callback
/// and archived verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub success: bool,
    #[serde(rename = "id")]
    pub session_id: Uuid,
    pub desired_amount: Decimal,
    pub amount_sent: Decimal,
    pub desired_lamports: u64,
    pub received_lamports: u64,
    pub transaction_signature: String,
    pub address: String,
    /// Unix seconds
    pub time_sent: i64,
    pub percent_of_desired: Decimal,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn new(
        session: &PaymentSession,
        received_lamports: u64,
        transaction_signature: String,
        slipped: bool,
    ) -> Self {
        Self {
            success: true,
            session_id: session.id,
            desired_amount: session.desired_sol(),
            amount_sent: lamports_to_sol(received_lamports),
            desired_lamports: session.desired_lamports,
            received_lamports,
            transaction_signature,
            address: session.disposable_address.clone(),
            time_sent: Utc::now().timestamp(),
            percent_of_desired: percent_of(received_lamports, session.desired_lamports),
            error: slipped.then(|| SLIPPAGE_ERROR_MESSAGE.to_string()),
        }
    }

    pub fn is_slipped(&self) -> bool {
        self.error.is_some()
    }
}
