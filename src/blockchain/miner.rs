use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::block::{leading_zero_bits, Block};
use super::chain::{ChainError, Ledger};
use super::crypto::{KeyPair, WalletId};
use super::pool::TransactionPool;
use super::transaction::{Transaction, TransactionError, TransactionKind};
use crate::audit::{AuditAction, AuditLog, LogStatus};
use crate::config::MinerConfig;

/// Errors that can occur while producing a block
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("Invalid reward wallet: {0}")]
    InvalidRewardWallet(String),

    #[error("Ledger error: {0}")]
    ChainError(#[from] ChainError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Proof of work task failed: {0}")]
    TaskFailed(String),
}

/// Result of one mining cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    /// Nothing to mine, or mining was stopped
    Idle,
    Mined(Block),
}

/// Searches nonces from the candidate's current nonce upwards
///
/// # Arguments
///
/// * `block` - Candidate block
/// * `difficulty` - Required leading zero bits
/// * `check_every` - Attempts between calls to `should_abort`
/// * `should_abort` - Polled before the first attempt and then periodically
///
/// # Returns
///
/// The sealed block, or `None` if `should_abort` returned true
pub fn solve<F>(mut block: Block, difficulty: u32, check_every: u64, mut should_abort: F) -> Option<Block>
where
    F: FnMut() -> bool,
{
    let check_every = check_every.max(1);
    let mut attempts: u64 = 0;

    loop {
        if attempts % check_every == 0 && should_abort() {
            return None;
        }

        let digest = block.hash_bytes();
        if leading_zero_bits(&digest) >= difficulty {
            block.hash = hex::encode(digest);
            return Some(block);
        }

        block.nonce = block.nonce.wrapping_add(1);
        attempts = attempts.wrapping_add(1);
    }
}

/// Transactions sorted by whether they can go into the next block
#[derive(Debug, Default)]
struct Assembly {
    included: Vec<Transaction>,

    /// Failed re-validation; go back to the pool
    deferred: Vec<Transaction>,

    /// Already committed; can never succeed
    stale: Vec<Transaction>,
}

/// The single writer of the ledger
pub struct Miner {
    ledger: Arc<Ledger>,
    pool: Arc<TransactionPool>,
    audit: Arc<AuditLog>,

    /// Signs reward transactions
    authority: Arc<KeyPair>,

    config: MinerConfig,
    reward_wallet: Option<WalletId>,
    trigger: Notify,
    shutdown: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(
        ledger: Arc<Ledger>,
        pool: Arc<TransactionPool>,
        audit: Arc<AuditLog>,
        authority: Arc<KeyPair>,
        config: MinerConfig,
    ) -> Result<Self, MinerError> {
        let reward_wallet = config
            .reward_wallet
            .as_deref()
            .map(|wallet| {
                WalletId::from_str(wallet).map_err(|e| MinerError::InvalidRewardWallet(e.to_string()))
            })
            .transpose()?;

        Ok(Miner {
            ledger,
            pool,
            audit,
            authority,
            config,
            reward_wallet,
            trigger: Notify::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Wakes the mining loop
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stops the mining loop and aborts any search in progress
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.trigger.notify_one();
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Mines on the configured interval, on pool submissions and on explicit triggers
    pub async fn run(self: Arc<Self>) {
        info!(
            "Miner started: difficulty {}, interval {}s, up to {} transactions per block",
            self.ledger.difficulty(),
            self.config.interval_secs,
            self.config.max_transactions_per_block
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.pool.notified() => {}
                _ = self.trigger.notified() => {}
            }

            if self.is_shutting_down() {
                break;
            }

            if self.ledger.is_compromised() {
                debug!("Ledger is read-only, skipping mining cycle");
                continue;
            }

            match self.mine_pending().await {
                Ok(MiningOutcome::Mined(block)) => {
                    debug!("Mining cycle produced block {}", block.index);
                }
                Ok(MiningOutcome::Idle) => {}
                Err(e) => error!("Mining cycle failed: {}", e),
            }
        }

        info!("Miner stopped");
    }

    /// Runs one mining cycle
    ///
    /// Drains the pool, re-validates against the tip, adds the reward, searches
    /// for a nonce and appends. A lost race to another append restores the
    /// transactions and starts over against the new tip.
    ///
    /// # Returns
    ///
    /// The appended block, or `Idle` if there was nothing to mine
    pub async fn mine_pending(&self) -> Result<MiningOutcome, MinerError> {
        loop {
            if self.is_shutting_down() {
                return Ok(MiningOutcome::Idle);
            }

            let tip = self.ledger.tip();
            let drained = self.pool.drain(self.config.max_transactions_per_block);
            let assembly = self.assemble(drained);

            if !assembly.stale.is_empty() {
                warn!(
                    "Dropping {} transactions that are already committed",
                    assembly.stale.len()
                );
                self.pool.commit(&ids(&assembly.stale));
            }
            self.pool.restore(assembly.deferred);

            let included = assembly.included;
            if included.is_empty() && self.reward_wallet.is_none() && !self.config.mine_empty_blocks {
                return Ok(MiningOutcome::Idle);
            }

            let index = tip.index + 1;
            let mut transactions = Vec::with_capacity(included.len() + 1);
            if let Some(wallet) = &self.reward_wallet {
                match self.reward(wallet, index) {
                    Ok(reward) => transactions.push(reward),
                    Err(e) => {
                        self.pool.restore(included);
                        return Err(e);
                    }
                }
            }
            transactions.extend(included.iter().cloned());

            let timestamp = Utc::now().timestamp().max(tip.timestamp);
            let candidate = Block::candidate(index, timestamp, transactions, tip.hash.clone());

            let sealed = match self.seal(candidate).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    self.pool.restore(included);
                    if self.is_shutting_down() {
                        return Ok(MiningOutcome::Idle);
                    }
                    debug!("Tip moved during proof of work, restarting");
                    continue;
                }
                Err(e) => {
                    self.pool.restore(included);
                    return Err(e);
                }
            };

            match self.ledger.append(sealed.clone()) {
                Ok(()) => {
                    self.pool.commit(&ids(&included));
                    info!(
                        "Mined block {} with {} transactions (nonce {}) {}",
                        sealed.index,
                        sealed.transactions.len(),
                        sealed.nonce,
                        sealed.hash
                    );
                    self.audit.record(
                        AuditAction::BlockMined,
                        LogStatus::Success,
                        format!(
                            "Mined block {} with {} transactions",
                            sealed.index,
                            sealed.transactions.len()
                        ),
                        None,
                        Some(sealed.hash.clone()),
                    );
                    return Ok(MiningOutcome::Mined(sealed));
                }
                Err(e) if e.is_conflict() => {
                    warn!("Lost race for block {}: {}", sealed.index, e);
                    self.pool.restore(included);
                }
                Err(e) => {
                    self.pool.restore(included);
                    self.audit.record(
                        AuditAction::MiningFailed,
                        LogStatus::Failure,
                        format!("Block {} rejected: {}", sealed.index, e),
                        None,
                        None,
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// Re-checks drained transactions against the tip and each other
    fn assemble(&self, drained: Vec<Transaction>) -> Assembly {
        let mut assembly = Assembly::default();
        let mut running: HashMap<WalletId, u64> = HashMap::new();

        for tx in drained {
            if self.ledger.contains_transaction(&tx.id) {
                assembly.stale.push(tx);
                continue;
            }

            if !tx.is_system() {
                let available = *running
                    .entry(tx.sender.clone())
                    .or_insert_with(|| self.ledger.balance_of(&tx.sender));

                if available < tx.amount {
                    debug!("Deferring transaction {}: sender balance changed", tx.id);
                    assembly.deferred.push(tx);
                    continue;
                }
                running.insert(tx.sender.clone(), available - tx.amount);
            }

            let credited = *running
                .entry(tx.receiver.clone())
                .or_insert_with(|| self.ledger.balance_of(&tx.receiver));
            running.insert(tx.receiver.clone(), credited.saturating_add(tx.amount));

            assembly.included.push(tx);
        }

        assembly
    }

    fn reward(&self, wallet: &WalletId, index: u64) -> Result<Transaction, MinerError> {
        let reward = Transaction::new_system(
            TransactionKind::Reward,
            &self.authority,
            wallet.clone(),
            self.config.reward_amount,
            Some(format!("Mining reward for block {}", index)),
        )?;
        Ok(reward)
    }

    /// Runs the nonce search off the async runtime
    async fn seal(&self, candidate: Block) -> Result<Option<Block>, MinerError> {
        let ledger = self.ledger.clone();
        let shutdown = self.shutdown.clone();
        let difficulty = ledger.difficulty();
        let check_every = self.config.cancel_check_every;
        let previous_hash = candidate.previous_hash.clone();

        tokio::task::spawn_blocking(move || {
            solve(candidate, difficulty, check_every, || {
                shutdown.load(Ordering::SeqCst) || ledger.tip_hash() != previous_hash
            })
        })
        .await
        .map_err(|e| MinerError::TaskFailed(e.to_string()))
    }
}

fn ids(transactions: &[Transaction]) -> Vec<String> {
    transactions.iter().map(|tx| tx.id.clone()).collect()
}
