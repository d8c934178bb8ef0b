use std::path::Path;

use log::warn;
use sled::{Db, Tree};
use thiserror::Error;

use super::account::Account;
use super::block::Block;
use crate::audit::LogEntry;

const AUTHORITY_KEY: &str = "authority_key";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Blocks read back from disk, in index order
#[derive(Debug, Default)]
pub struct StoredChain {
    pub blocks: Vec<Block>,

    /// Set when reading stopped at an entry that could not be decoded
    pub truncated: bool,
}

/// Storage for ledger data
pub struct LedgerStorage {
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Registered accounts keyed by wallet id
    accounts: Tree,

    /// Audit entries keyed by big-endian sequence number
    logs: Tree,

    metadata: Tree,
}

impl std::fmt::Debug for LedgerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStorage").finish()
    }
}

impl LedgerStorage {
    /// Opens (or creates) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a throwaway database that is removed on drop
    #[cfg(test)]
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let accounts = db.open_tree("accounts")?;
        let logs = db.open_tree("logs")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            accounts,
            logs,
            metadata,
        })
    }

    /// Saves a block and flushes it to disk
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.blocks.insert(block.index.to_be_bytes(), value)?;
        self.blocks.flush()?;
        Ok(())
    }

    /// Loads blocks in index order, stopping at the first undecodable entry
    pub fn load_blocks(&self) -> Result<StoredChain, StorageError> {
        let mut chain = StoredChain::default();

        for result in self.blocks.iter() {
            let (key, value) = result?;

            match bincode::deserialize::<Block>(&value) {
                Ok(block) => chain.blocks.push(block),
                Err(e) => {
                    warn!(
                        "Failed to deserialize block at key {}: {}",
                        hex::encode(key.as_ref()),
                        e
                    );
                    chain.truncated = true;
                    break;
                }
            }
        }

        Ok(chain)
    }

    /// Saves an account to the database
    pub fn save_account(&self, account: &Account) -> Result<(), StorageError> {
        let value = bincode::serialize(account)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.accounts.insert(account.wallet_id.0.as_bytes(), value)?;
        Ok(())
    }

    /// Gets all accounts from storage, skipping entries that cannot be decoded
    pub fn load_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let mut accounts = Vec::new();
        let mut deserialization_errors = Vec::new();

        for result in self.accounts.iter() {
            let (key, value) = result?;
            match bincode::deserialize::<Account>(&value) {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    let key_str = String::from_utf8_lossy(key.as_ref()).to_string();
                    deserialization_errors.push(format!("{}: {}", key_str, e));
                }
            }
        }

        if !deserialization_errors.is_empty() {
            warn!(
                "Some accounts could not be deserialized: {}",
                deserialization_errors.join(", ")
            );
        }

        Ok(accounts)
    }

    /// Appends an audit entry under `sequence`
    pub fn append_log(&self, sequence: u64, entry: &LogEntry) -> Result<(), StorageError> {
        let value = bincode::serialize(entry)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.logs.insert(sequence.to_be_bytes(), value)?;
        Ok(())
    }

    /// Loads audit entries in arrival order, skipping entries that cannot be decoded
    pub fn load_logs(&self) -> Result<Vec<LogEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for result in self.logs.iter() {
            let (key, value) = result?;
            match bincode::deserialize::<LogEntry>(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        "Skipping audit entry at key {}: {}",
                        hex::encode(key.as_ref()),
                        e
                    );
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!("{} audit entries could not be deserialized", skipped);
        }

        Ok(entries)
    }

    /// Sequence number after the highest stored audit entry
    pub fn next_log_sequence(&self) -> Result<u64, StorageError> {
        let last = self.logs.last()?;
        Ok(match last {
            Some((key, _)) => {
                let mut bytes = [0u8; 8];
                if key.len() == bytes.len() {
                    bytes.copy_from_slice(&key);
                }
                u64::from_be_bytes(bytes).saturating_add(1)
            }
            None => 0,
        })
    }

    /// Stores the node authority secret
    pub fn save_authority_key(&self, secret: &[u8; 32]) -> Result<(), StorageError> {
        self.metadata.insert(AUTHORITY_KEY, secret.as_slice())?;
        self.metadata.flush()?;
        Ok(())
    }

    pub fn load_authority_key(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.metadata.get(AUTHORITY_KEY)?.map(|value| value.to_vec()))
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
