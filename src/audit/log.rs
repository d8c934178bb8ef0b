use chrono::Utc;
use log::{debug, error, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::blockchain::storage::{LedgerStorage, StorageError};

/// Security relevant actions that are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AuditAction {
    UserRegistered,
    WalletGenerated,
    LoginRequested,
    OtpDispatched,
    OtpDeliveryFailed,
    LoginSucceeded,
    LoginFailed,
    BalanceQueried,
    TransactionSubmitted,
    TransactionRejected,
    BlockMined,
    MiningFailed,
    BeneficiaryAdded,
    BeneficiaryRemoved,
    AdminStatsQueried,
    AdminUsersQueried,
    AdminPromoted,
    CoinsMinted,
    AdminAccessDenied,
    ChainVerified,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegistered => "UserRegistered",
            AuditAction::WalletGenerated => "WalletGenerated",
            AuditAction::LoginRequested => "LoginRequested",
            AuditAction::OtpDispatched => "OtpDispatched",
            AuditAction::OtpDeliveryFailed => "OtpDeliveryFailed",
            AuditAction::LoginSucceeded => "LoginSucceeded",
            AuditAction::LoginFailed => "LoginFailed",
            AuditAction::BalanceQueried => "BalanceQueried",
            AuditAction::TransactionSubmitted => "TransactionSubmitted",
            AuditAction::TransactionRejected => "TransactionRejected",
            AuditAction::BlockMined => "BlockMined",
            AuditAction::MiningFailed => "MiningFailed",
            AuditAction::BeneficiaryAdded => "BeneficiaryAdded",
            AuditAction::BeneficiaryRemoved => "BeneficiaryRemoved",
            AuditAction::AdminStatsQueried => "AdminStatsQueried",
            AuditAction::AdminUsersQueried => "AdminUsersQueried",
            AuditAction::AdminPromoted => "AdminPromoted",
            AuditAction::CoinsMinted => "CoinsMinted",
            AuditAction::AdminAccessDenied => "AdminAccessDenied",
            AuditAction::ChainVerified => "ChainVerified",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failure,
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LogEntry {
    pub action: AuditAction,

    /// Seconds since the Unix epoch
    pub timestamp: i64,

    pub details: String,

    pub status: LogStatus,

    pub ip_address: Option<String>,

    /// Block this action produced, if any
    pub block_hash: Option<String>,
}

impl LogEntry {
    pub fn new(
        action: AuditAction,
        status: LogStatus,
        details: impl Into<String>,
        ip_address: Option<String>,
        block_hash: Option<String>,
    ) -> Self {
        LogEntry {
            action,
            timestamp: Utc::now().timestamp(),
            details: details.into(),
            status,
            ip_address,
            block_hash,
        }
    }
}

/// Append-only audit log.
///
/// Callers must not pass secrets (private keys, OTP codes) in `details`.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<LogEntry>>,

    /// Storage key of the next entry; skipped entries keep their slot
    next_sequence: AtomicU64,

    storage: Option<Arc<LedgerStorage>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the log on top of `storage`, restoring earlier entries
    pub fn with_storage(storage: Arc<LedgerStorage>) -> Result<Self, StorageError> {
        let entries = storage.load_logs()?;
        let next_sequence = storage.next_log_sequence()?;
        info!("Loaded {} audit entries from storage", entries.len());

        Ok(AuditLog {
            entries: RwLock::new(entries),
            next_sequence: AtomicU64::new(next_sequence),
            storage: Some(storage),
        })
    }

    /// Appends an entry. Never fails the caller: a storage failure is logged
    /// and the entry is still kept in memory.
    pub fn record(
        &self,
        action: AuditAction,
        status: LogStatus,
        details: impl Into<String>,
        ip_address: Option<String>,
        block_hash: Option<String>,
    ) -> LogEntry {
        let entry = LogEntry::new(action, status, details, ip_address, block_hash);
        debug!("audit {} {:?}: {}", entry.action, entry.status, entry.details);

        let mut entries = self.entries.write();
        if let Some(storage) = &self.storage {
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            if let Err(err) = storage.append_log(sequence, &entry) {
                error!("Failed to persist audit entry {}: {}", entry.action, err);
            }
        }
        entries.push(entry.clone());

        entry
    }

    pub fn success(&self, action: AuditAction, details: impl Into<String>, ip_address: Option<String>) -> LogEntry {
        self.record(action, LogStatus::Success, details, ip_address, None)
    }

    pub fn failure(&self, action: AuditAction, details: impl Into<String>, ip_address: Option<String>) -> LogEntry {
        self.record(action, LogStatus::Failure, details, ip_address, None)
    }

    /// Every entry in arrival order
    #[cfg(test)]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    /// Newest first, skipping `offset` entries and returning at most `limit`
    pub fn page(&self, limit: Option<usize>, offset: Option<usize>) -> Vec<LogEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .rev()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
