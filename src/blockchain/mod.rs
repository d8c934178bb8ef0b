// Ledger module
//
// This module contains the core ledger implementation including:
// - Block structure and proof of work arithmetic
// - Ledger store
// - Transaction structure and the transaction pool
// - Cryptography utilities
// - Account registry
// - Miner

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod pool;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use account::{AccountRegistry, Role};
pub use block::Block;
pub use chain::Ledger;
pub use crypto::{KeyPair, WalletId};
pub use miner::Miner;
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionKind};
