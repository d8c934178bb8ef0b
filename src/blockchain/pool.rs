use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use utoipa::ToSchema;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::chain::Ledger;
use super::transaction::{Transaction, TransactionError};

/// Why the pool refused a transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Duplicate transaction")]
    DuplicateTransaction,

    #[error("Sender and receiver must differ")]
    SelfTransfer,

    #[error("Missing or invalid field: {0}")]
    MissingField(String),

    #[error("Ledger is read-only after a failed integrity check")]
    LedgerUnavailable,
}

impl From<TransactionError> for RejectionReason {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::InvalidAmount(reason) => RejectionReason::InvalidAmount(reason),
            TransactionError::SelfTransfer => RejectionReason::SelfTransfer,
            TransactionError::MissingField(field) => RejectionReason::MissingField(field.to_string()),
            TransactionError::InvalidSender(reason) => RejectionReason::MissingField(reason),
            TransactionError::CryptoError(_)
            | TransactionError::SerializationError(_) => RejectionReason::InvalidSignature,
        }
    }
}

/// Receipt for a staged transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Accepted {
    pub id: String,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Waiting to be mined, in arrival order
    pending: VecDeque<Transaction>,

    /// Drained by the miner but not yet committed
    in_flight: HashMap<String, Transaction>,
}

impl PoolState {
    fn contains(&self, id: &str) -> bool {
        self.in_flight.contains_key(id) || self.pending.iter().any(|tx| tx.id == id)
    }

    /// Amount already promised by `tx`'s sender in other uncommitted transactions
    ///
    /// In-flight transactions that already reached the ledger are skipped;
    /// the balance has been debited for them.
    fn reserved_by_sender(&self, tx: &Transaction, ledger: &Ledger) -> u64 {
        self.pending
            .iter()
            .chain(self.in_flight.values())
            .filter(|other| other.sender == tx.sender && other.id != tx.id)
            .filter(|other| !ledger.contains_transaction(&other.id))
            .fold(0u64, |total, other| total.saturating_add(other.debit()))
    }
}

/// Validated transactions that are not yet in a block.
///
/// Every mutation happens under one mutex, so submissions and drains are
/// atomic with respect to each other. The ledger read lock is only taken
/// while the pool lock is held, never the other way round.
#[derive(Debug)]
pub struct TransactionPool {
    state: Mutex<PoolState>,
    ledger: Arc<Ledger>,
    notify: Notify,
    trigger_on_submit: bool,
}

impl TransactionPool {
    pub fn new(ledger: Arc<Ledger>, trigger_on_submit: bool) -> Self {
        TransactionPool {
            state: Mutex::new(PoolState::default()),
            ledger,
            notify: Notify::new(),
            trigger_on_submit,
        }
    }

    /// Validates and stages a transaction
    ///
    /// # Arguments
    ///
    /// * `tx` - A signed transfer, or an authority signed system transaction
    ///
    /// # Returns
    ///
    /// The staged transaction id, or the first check that failed. A rejected
    /// transaction leaves the pool untouched.
    pub fn submit(&self, tx: Transaction) -> Result<Accepted, RejectionReason> {
        if self.ledger.is_compromised() {
            return Err(RejectionReason::LedgerUnavailable);
        }

        tx.validate_structure()?;

        if !tx.verify_signature(self.ledger.authority()) {
            return Err(RejectionReason::InvalidSignature);
        }

        let mut state = self.state.lock();

        // Replay is checked before funds so that a committed transaction is
        // reported as a duplicate even once its sender has spent down
        if state.contains(&tx.id) || self.ledger.contains_transaction(&tx.id) {
            return Err(RejectionReason::DuplicateTransaction);
        }

        if !tx.is_system() {
            // Reserved before balance: a block landing in between is then
            // counted twice, which only errs towards rejecting
            let reserved = state.reserved_by_sender(&tx, &self.ledger);
            let balance = self.ledger.balance_of(&tx.sender);
            let available = balance.saturating_sub(reserved);
            if available < tx.amount {
                return Err(RejectionReason::InsufficientFunds {
                    available,
                    required: tx.amount,
                });
            }
        }

        let accepted = Accepted { id: tx.id.clone() };
        debug!("Staged transaction {} ({:?})", tx.id, tx.kind);
        state.pending.push_back(tx);
        drop(state);

        if self.trigger_on_submit {
            self.notify.notify_one();
        }

        Ok(accepted)
    }

    /// Stages a reward or mint transaction
    pub fn submit_system(&self, tx: Transaction) -> Result<Accepted, RejectionReason> {
        if !tx.is_system() {
            return Err(RejectionReason::MissingField(
                "expected a system transaction".to_string(),
            ));
        }
        let accepted = self.submit(tx)?;
        info!("Staged system transaction {}", accepted.id);
        Ok(accepted)
    }

    /// Removes up to `max` of the oldest transactions and marks them in flight
    pub fn drain(&self, max: usize) -> Vec<Transaction> {
        let mut state = self.state.lock();
        let count = max.min(state.pending.len());

        let drained: Vec<Transaction> = state.pending.drain(..count).collect();
        for tx in &drained {
            state.in_flight.insert(tx.id.clone(), tx.clone());
        }

        drained
    }

    /// Forgets in-flight transactions that are now in a block
    pub fn commit(&self, ids: &[String]) {
        let mut state = self.state.lock();
        for id in ids {
            state.in_flight.remove(id);
        }
    }

    /// Returns in-flight transactions to the front of the queue, keeping their order
    pub fn restore(&self, transactions: Vec<Transaction>) {
        if transactions.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        warn!("Restoring {} transactions to the pool", transactions.len());

        for tx in transactions.into_iter().rev() {
            state.in_flight.remove(&tx.id);
            state.pending.push_front(tx);
        }
    }

    /// Snapshot of the waiting transactions, oldest first
    pub fn pending(&self) -> Vec<Transaction> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Number of waiting transactions
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    #[cfg(test)]
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Completes when a submission wakes the miner
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
