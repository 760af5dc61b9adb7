//! Atomic transfer bundles and fee-aware sweeping.

use std::collections::HashSet;
use std::sync::Arc;

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::Message,
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::Transaction,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::{LedgerGateway, SubmitOptions};

/// Largest serialized transaction the network accepts, in bytes.
pub const MAX_TRANSACTION_SIZE: usize = PACKET_DATA_SIZE;
pub const MAX_INSTRUCTIONS: usize = 30;
/// Distinct signing keys per transaction, fee payer included.
pub const MAX_SIGNERS: usize = 18;
pub const MAX_COMPUTE_UNITS: u64 = 1_400_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverboardReason {
    TooManyInstructions { count: usize },
    TooManySigners { count: usize },
    TooLarge { size: usize },
    SimulationFailed(String),
    ComputeExceeded { units: u64 },
}

impl std::fmt::Display for OverboardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyInstructions { count } => {
                write!(f, "{} instructions exceeds limit of {}", count, MAX_INSTRUCTIONS)
            }
            Self::TooManySigners { count } => {
                write!(f, "{} signers exceeds limit of {}", count, MAX_SIGNERS)
            }
            Self::TooLarge { size } => {
                write!(f, "{} bytes exceeds limit of {}", size, MAX_TRANSACTION_SIZE)
            }
            Self::SimulationFailed(e) => write!(f, "simulation failed: {}", e),
            Self::ComputeExceeded { units } => {
                write!(f, "{} compute units exceeds limit of {}", units, MAX_COMPUTE_UNITS)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction overboard: {0}")]
    Overboard(OverboardReason),

    #[error("Fee unavailable: {0}")]
    FeeUnavailable(String),

    #[error("Insufficient funds: balance {balance} does not cover fee {fee}")]
    InsufficientFunds { balance: u64, fee: u64 },

    #[error("Transaction bundle is empty")]
    EmptyBundle,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Ledger(#[from] shared::Error),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// One lamport transfer out of a key this process holds.
pub struct TransferInstruction<'a> {
    pub from: &'a Keypair,
    pub to: Pubkey,
    pub lamports: u64,
}

impl<'a> TransferInstruction<'a> {
    pub fn new(from: &'a Keypair, to: Pubkey, lamports: u64) -> Self {
        Self { from, to, lamports }
    }

    fn to_instruction(&self) -> Instruction {
        system_instruction::transfer(&self.from.pubkey(), &self.to, self.lamports)
    }
}

/// Ordered transfers executed all-or-nothing in a single transaction.
///
/// Without an explicit fee payer the first transfer's source pays.
#[derive(Default)]
pub struct TransactionBundle<'a> {
    transfers: Vec<TransferInstruction<'a>>,
    fee_payer: Option<&'a Keypair>,
}

impl<'a> TransactionBundle<'a> {
    pub fn new() -> Self {
        Self {
            transfers: Vec::new(),
            fee_payer: None,
        }
    }

    pub fn single(from: &'a Keypair, to: Pubkey, lamports: u64) -> Self {
        let mut bundle = Self::new();
        bundle.push(TransferInstruction::new(from, to, lamports));
        bundle
    }

    pub fn with_fee_payer(mut self, payer: &'a Keypair) -> Self {
        self.fee_payer = Some(payer);
        self
    }

    pub fn push(&mut self, transfer: TransferInstruction<'a>) -> &mut Self {
        self.transfers.push(transfer);
        self
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    fn payer(&self) -> Option<&'a Keypair> {
        self.fee_payer.or_else(|| self.transfers.first().map(|t| t.from))
    }

    /// Every key that must sign, fee payer first, without duplicates.
    fn signers(&self) -> Vec<&'a Keypair> {
        let mut seen = HashSet::new();
        let mut signers = Vec::new();
        let keys = self.payer().into_iter().chain(self.transfers.iter().map(|t| t.from));
        for key in keys {
            if seen.insert(key.pubkey()) {
                signers.push(key);
            }
        }
        signers
    }
}

/// Outcome of a successful full-balance sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReceipt {
    pub signature: Signature,
    pub swept_lamports: u64,
    pub fee: u64,
}

/// Serialized size of a transaction with `signers` signatures over `message`.
fn wire_size(message: &Message, signers: usize) -> usize {
    // compact-u16 prefix for the signature array
    let prefix = if signers < 0x80 { 1 } else { 2 };
    prefix + signers * 64 + message.serialize().len()
}

pub struct TransactionBuilder {
    gateway: Arc<dyn LedgerGateway>,
}

impl TransactionBuilder {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self { gateway }
    }

    /// Validate the bundle against protocol limits, then sign it over the
    /// latest blockhash. Nothing is fetched from the ledger for a bundle
    /// that breaks a limit.
    pub async fn build(&self, bundle: &TransactionBundle<'_>) -> Result<Transaction> {
        let message = Self::checked_message(bundle, Hash::default())?;
        let blockhash = self.gateway.latest_blockhash().await?;
        let signers = bundle.signers();

        let mut transaction = Transaction::new_unsigned(Message {
            recent_blockhash: blockhash,
            ..message
        });
        transaction
            .try_sign(&signers, blockhash)
            .map_err(|e| TransactionError::Signing(e.to_string()))?;

        debug!(
            "Built transaction with {} instruction(s) and {} signer(s)",
            bundle.len(),
            signers.len()
        );
        Ok(transaction)
    }

    fn checked_message(bundle: &TransactionBundle<'_>, blockhash: Hash) -> Result<Message> {
        let payer = bundle.payer().ok_or(TransactionError::EmptyBundle)?;

        if bundle.len() > MAX_INSTRUCTIONS {
            return Err(TransactionError::Overboard(OverboardReason::TooManyInstructions {
                count: bundle.len(),
            }));
        }

        let signer_count = bundle.signers().len();
        if signer_count > MAX_SIGNERS {
            return Err(TransactionError::Overboard(OverboardReason::TooManySigners {
                count: signer_count,
            }));
        }

        let instructions: Vec<Instruction> =
            bundle.transfers.iter().map(|t| t.to_instruction()).collect();
        let message = Message::new_with_blockhash(&instructions, Some(&payer.pubkey()), &blockhash);

        let size = wire_size(&message, message.header.num_required_signatures as usize);
        if size > MAX_TRANSACTION_SIZE {
            return Err(TransactionError::Overboard(OverboardReason::TooLarge { size }));
        }

        Ok(message)
    }

    async fn check_simulation(&self, transaction: &Transaction) -> Result<()> {
        let outcome = self.gateway.simulate(transaction).await?;
        if outcome.failed() {
            let error = outcome.error.unwrap_or_default();
            return Err(TransactionError::Overboard(OverboardReason::SimulationFailed(error)));
        }
        if outcome.exceeds_compute_limit() {
            let units = outcome.units_consumed.unwrap_or_default();
            return Err(TransactionError::Overboard(OverboardReason::ComputeExceeded { units }));
        }
        Ok(())
    }

    /// Build, optionally simulate, and submit a bundle as one transaction.
    pub async fn submit_bundle(
        &self,
        bundle: &TransactionBundle<'_>,
        simulate: bool,
    ) -> Result<Signature> {
        let transaction = self.build(bundle).await?;
        if simulate {
            self.check_simulation(&transaction).await?;
        }
        let signature = self
            .gateway
            .submit(&transaction, SubmitOptions::default())
            .await?;
        info!("Submitted bundle of {} transfer(s): {}", bundle.len(), signature);
        Ok(signature)
    }

    /// Send the whole balance of `from`, less the network fee, to `to`.
    pub async fn sweep_all(&self, from: &Keypair, to: &Pubkey, simulate: bool) -> Result<SweepReceipt> {
        let source = from.pubkey();
        let balance = self.gateway.balance_of(&source).await?;

        let provisional = self.build(&TransactionBundle::single(from, *to, balance)).await?;
        let fee = match self.gateway.estimate_fee(&provisional.message).await {
            Ok(Some(fee)) if fee > 0 => fee,
            Ok(Some(_)) | Ok(None) => {
                return Err(TransactionError::FeeUnavailable(
                    "network returned no fee for sweep message".to_string(),
                ))
            }
            Err(e) => return Err(TransactionError::FeeUnavailable(e.to_string())),
        };

        if balance <= fee {
            warn!("Cannot sweep {}: balance {} does not cover fee {}", source, balance, fee);
            return Err(TransactionError::InsufficientFunds { balance, fee });
        }

        let amount = balance - fee;
        let transaction = self.build(&TransactionBundle::single(from, *to, amount)).await?;
        if simulate {
            self.check_simulation(&transaction).await?;
        }

        let signature = self
            .gateway
            .submit(&transaction, SubmitOptions::default())
            .await?;
        info!("Swept {} lamports from {} to {} ({})", amount, source, to, signature);

        Ok(SweepReceipt {
            signature,
            swept_lamports: amount,
            fee,
        })
    }
}
