//! In-process ledger used by tests across the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use shared::{Error, Result};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, message::Message, pubkey::Pubkey,
    signature::Signature, system_program, transaction::Transaction,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::gateway::{LedgerGateway, LogSubscription, SubmitOptions};
use crate::types::{LogEvent, ParsedTransaction, ParsedTransfer, SimulationOutcome};

const DEFAULT_FEE: u64 = 5_000;

struct Subscriber {
    address: Pubkey,
    sender: mpsc::Sender<Result<LogEvent>>,
}

struct MockState {
    balances: HashMap<Pubkey, u64>,
    fee: Option<u64>,
    fee_error: Option<String>,
    simulation: SimulationOutcome,
    simulations: usize,
    transactions: HashMap<Signature, ParsedTransaction>,
    submitted: Vec<Transaction>,
    submit_error: Option<String>,
    balance_error: Option<String>,
    fetch_error: Option<String>,
    subscribe_error: Option<String>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber: u64,
    blockhash: Hash,
}

/// A `LedgerGateway` backed by in-memory balances.
///
/// Submitted transactions apply their system transfers and charge the
/// configured fee to the fee payer.
pub struct MockLedger {
    state: Arc<Mutex<MockState>>,
    released: Arc<AtomicUsize>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                balances: HashMap::new(),
                fee: Some(DEFAULT_FEE),
                fee_error: None,
                simulation: SimulationOutcome {
                    error: None,
                    units_consumed: Some(150),
                },
                simulations: 0,
                transactions: HashMap::new(),
                submitted: Vec::new(),
                submit_error: None,
                balance_error: None,
                fetch_error: None,
                subscribe_error: None,
                subscribers: HashMap::new(),
                next_subscriber: 0,
                blockhash: Hash::new_unique(),
            })),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_balance(&self, address: &Pubkey, lamports: u64) {
        self.state().balances.insert(*address, lamports);
    }

    pub fn balance(&self, address: &Pubkey) -> u64 {
        self.state().balances.get(address).copied().unwrap_or(0)
    }

    pub fn set_fee(&self, fee: Option<u64>) {
        self.state().fee = fee;
    }

    pub fn fee(&self) -> u64 {
        self.state().fee.unwrap_or(0)
    }

    pub fn fail_fee(&self, message: &str) {
        self.state().fee_error = Some(message.to_string());
    }

    pub fn set_simulation(&self, outcome: SimulationOutcome) {
        self.state().simulation = outcome;
    }

    pub fn simulation_count(&self) -> usize {
        self.state().simulations
    }

    pub fn fail_submit(&self, message: &str) {
        self.state().submit_error = Some(message.to_string());
    }

    pub fn fail_balance(&self, message: Option<&str>) {
        self.state().balance_error = message.map(str::to_string);
    }

    pub fn fail_fetch(&self, message: Option<&str>) {
        self.state().fetch_error = message.map(str::to_string);
    }

    pub fn fail_subscribe(&self, message: Option<&str>) {
        self.state().subscribe_error = message.map(str::to_string);
    }

    pub fn insert_transaction(&self, transaction: ParsedTransaction) {
        self.state()
            .transactions
            .insert(transaction.signature, transaction);
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.state().submitted.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.state().submitted.len()
    }

    /// Subscriptions currently open.
    pub fn active_subscriptions(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Subscriptions that have been cancelled and unsubscribed.
    pub fn released_subscriptions(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn has_subscriber(&self, address: &Pubkey) -> bool {
        self.state()
            .subscribers
            .values()
            .any(|s| &s.address == address)
    }

    /// Wait until someone subscribes to `address`. Returns false if nobody
    /// does within a few seconds.
    pub async fn wait_for_subscriber(&self, address: &Pubkey) -> bool {
        for _ in 0..5_000 {
            if self.has_subscriber(address) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }

    /// Deliver a log notification to every subscriber of `address`.
    pub fn push_log(&self, address: &Pubkey, event: LogEvent) -> usize {
        self.send(address, || Ok(event.clone()))
    }

    /// Deliver a transport failure to every subscriber of `address`.
    pub fn fail_stream(&self, address: &Pubkey, message: &str) -> usize {
        self.send(address, || Err(Error::Subscription(message.to_string())))
    }

    /// Close every stream watching `address` as if the node dropped it.
    pub fn end_stream(&self, address: &Pubkey) {
        self.state().subscribers.retain(|_, s| &s.address != address);
    }

    fn send<F>(&self, address: &Pubkey, item: F) -> usize
    where
        F: Fn() -> Result<LogEvent>,
    {
        let state = self.state();
        state
            .subscribers
            .values()
            .filter(|s| &s.address == address)
            .filter(|s| s.sender.try_send(item()).is_ok())
            .count()
    }

    /// Record a confirmed transfer, credit the destination and notify its
    /// subscribers. Returns the transaction signature.
    pub fn deliver_transfer(&self, source: Pubkey, destination: Pubkey, lamports: u64) -> Signature {
        let signature = Signature::new_unique();
        {
            let mut state = self.state();
            *state.balances.entry(destination).or_insert(0) += lamports;
            state.transactions.insert(
                signature,
                ParsedTransaction {
                    signature,
                    error: None,
                    fee: DEFAULT_FEE,
                    transfers: vec![ParsedTransfer {
                        source,
                        destination,
                        lamports,
                    }],
                },
            );
        }
        self.push_log(
            &destination,
            LogEvent {
                signature,
                error: None,
            },
        );
        signature
    }

    fn apply(state: &mut MockState, transaction: &Transaction) -> Result<()> {
        let message = &transaction.message;
        let keys = &message.account_keys;
        let mut debits: Vec<(Pubkey, u64)> = Vec::new();
        let mut credits: Vec<(Pubkey, u64)> = Vec::new();

        if let (Some(payer), Some(fee)) = (keys.first(), state.fee) {
            debits.push((*payer, fee));
        }

        for ix in &message.instructions {
            let program = keys.get(ix.program_id_index as usize);
            if program != Some(&system_program::id()) || ix.data.len() != 12 || ix.data[..4] != [2, 0, 0, 0] {
                continue;
            }
            let mut amount = [0u8; 8];
            amount.copy_from_slice(&ix.data[4..12]);
            let lamports = u64::from_le_bytes(amount);

            let account = |i: usize| {
                ix.accounts
                    .get(i)
                    .and_then(|idx| keys.get(*idx as usize))
                    .copied()
                    .ok_or_else(|| Error::SolanaRpc("malformed transfer".to_string()))
            };
            debits.push((account(0)?, lamports));
            credits.push((account(1)?, lamports));
        }

        let mut balances = state.balances.clone();
        for (key, lamports) in debits {
            let balance = balances.entry(key).or_insert(0);
            *balance = balance
                .checked_sub(lamports)
                .ok_or_else(|| Error::SolanaRpc(format!("insufficient funds for {}", key)))?;
        }
        for (key, lamports) in credits {
            *balances.entry(key).or_insert(0) += lamports;
        }
        state.balances = balances;
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn balance_of(&self, address: &Pubkey) -> Result<u64> {
        let state = self.state();
        if let Some(e) = &state.balance_error {
            return Err(Error::SolanaRpc(e.clone()));
        }
        Ok(state.balances.get(address).copied().unwrap_or(0))
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(self.state().blockhash)
    }

    async fn estimate_fee(&self, _message: &Message) -> Result<Option<u64>> {
        let state = self.state();
        match &state.fee_error {
            Some(e) => Err(Error::SolanaRpc(e.clone())),
            None => Ok(state.fee),
        }
    }

    async fn submit(&self, transaction: &Transaction, _options: SubmitOptions) -> Result<Signature> {
        let mut state = self.state();
        if let Some(e) = &state.submit_error {
            return Err(Error::SolanaRpc(e.clone()));
        }
        if transaction.verify().is_err() {
            return Err(Error::SolanaRpc("signature verification failed".to_string()));
        }
        Self::apply(&mut state, transaction)?;
        state.submitted.push(transaction.clone());
        Ok(transaction.signatures.first().copied().unwrap_or_default())
    }

    async fn simulate(&self, _transaction: &Transaction) -> Result<SimulationOutcome> {
        let mut state = self.state();
        state.simulations += 1;
        Ok(state.simulation.clone())
    }

    async fn subscribe_logs(
        &self,
        address: &Pubkey,
        _commitment: CommitmentConfig,
    ) -> Result<LogSubscription> {
        let (sender, receiver) = mpsc::channel(64);
        let id = {
            let mut state = self.state();
            if let Some(e) = &state.subscribe_error {
                return Err(Error::Subscription(e.clone()));
            }
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.insert(
                id,
                Subscriber {
                    address: *address,
                    sender,
                },
            );
            id
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = self.state.clone();
        let released = self.released.clone();
        let driver = tokio::spawn(async move {
            token.cancelled().await;
            state
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .subscribers
                .remove(&id);
            released.fetch_add(1, Ordering::SeqCst);
        });

        Ok(LogSubscription::new(receiver, cancel, Some(driver)))
    }

    async fn fetch_transaction(&self, signature: &Signature) -> Result<Option<ParsedTransaction>> {
        let state = self.state();
        if let Some(e) = &state.fetch_error {
            return Err(Error::SolanaRpc(e.clone()));
        }
        Ok(state.transactions.get(signature).cloned())
    }
}
