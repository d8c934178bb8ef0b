use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::Arc;

use super::crypto::{KeyPair, WalletId};
use super::storage::{LedgerStorage, StorageError};

/// Errors that can occur during account operations
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid beneficiary: {0}")]
    InvalidBeneficiary(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// Access level of a registered account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Role {
    Admin,
    #[default]
    User,
}

/// A registered wallet owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// The account's wallet id
    #[schema(value_type = String)]
    pub wallet_id: WalletId,

    pub full_name: String,

    pub email: String,

    /// National identity number
    pub cnic: String,

    /// Hex encoded public key; the private key is never stored
    pub public_key: String,

    #[schema(value_type = Vec<String>)]
    pub beneficiaries: Vec<WalletId>,

    /// Seconds since the Unix epoch
    pub created_at: i64,

    pub role: Role,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Registry of all registered accounts.
///
/// Accounts are created at registration, mutated only by beneficiary changes
/// and role promotion, and never deleted.
#[derive(Debug)]
pub struct AccountRegistry {
    accounts: DashMap<WalletId, Account>,

    /// Normalized email -> wallet id
    emails: DashMap<String, WalletId>,

    storage: Option<Arc<LedgerStorage>>,
}

impl AccountRegistry {
    /// Creates an empty, memory-only registry
    pub fn new() -> Self {
        AccountRegistry {
            accounts: DashMap::new(),
            emails: DashMap::new(),
            storage: None,
        }
    }

    /// Creates a registry backed by `storage`, restoring any saved accounts
    ///
    /// # Arguments
    ///
    /// * `storage` - The storage to read from and write through to
    ///
    /// # Returns
    ///
    /// The restored registry
    pub fn with_storage(storage: Arc<LedgerStorage>) -> Result<Self, AccountError> {
        let registry = AccountRegistry {
            accounts: DashMap::new(),
            emails: DashMap::new(),
            storage: None,
        };

        let accounts = storage.load_accounts()?;
        info!("Loaded {} accounts from storage", accounts.len());
        for account in accounts {
            registry.emails.insert(normalize_email(&account.email), account.wallet_id.clone());
            registry.accounts.insert(account.wallet_id.clone(), account);
        }

        Ok(AccountRegistry {
            storage: Some(storage),
            ..registry
        })
    }

    /// Registers a new account and generates its key pair
    ///
    /// # Arguments
    ///
    /// * `full_name` - The owner's name
    /// * `email` - Contact address, also the OTP destination; must be unique
    /// * `cnic` - National identity number
    ///
    /// # Returns
    ///
    /// The stored account and the key pair. The caller hands the private key
    /// to the owner once; it is not kept.
    pub fn register(
        &self,
        full_name: &str,
        email: &str,
        cnic: &str,
    ) -> Result<(Account, KeyPair), AccountError> {
        let full_name = required("full_name", full_name)?;
        let cnic = required("cnic", cnic)?;
        let email = required("email", email)?;

        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(AccountError::InvalidField {
                field: "email",
                reason: format!("{} is not an email address", email),
            });
        }

        let keypair = KeyPair::generate();
        let wallet_id = keypair.wallet_id().clone();

        match self.emails.entry(normalize_email(&email)) {
            Entry::Occupied(_) => return Err(AccountError::EmailTaken(email)),
            Entry::Vacant(slot) => {
                slot.insert(wallet_id.clone());
            }
        }

        let account = Account {
            wallet_id: wallet_id.clone(),
            full_name,
            email,
            cnic,
            public_key: keypair.public_key_hex(),
            beneficiaries: Vec::new(),
            created_at: Utc::now().timestamp(),
            role: Role::User,
        };

        if let Err(err) = self.persist(&account) {
            self.emails.remove(&normalize_email(&account.email));
            return Err(err);
        }

        self.accounts.insert(wallet_id, account.clone());
        Ok((account, keypair))
    }

    /// Gets an account by wallet id
    pub fn get(&self, wallet_id: &WalletId) -> Option<Account> {
        self.accounts.get(wallet_id).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, wallet_id: &WalletId) -> bool {
        self.accounts.contains_key(wallet_id)
    }

    /// All accounts, oldest registration first
    pub fn all(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> =
            self.accounts.iter().map(|entry| entry.value().clone()).collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        accounts
    }

    pub fn count(&self) -> usize {
        self.accounts.len()
    }

    /// Adds a beneficiary to an account's list
    ///
    /// # Arguments
    ///
    /// * `wallet_id` - The account being changed
    /// * `beneficiary` - A registered wallet other than `wallet_id`
    ///
    /// # Returns
    ///
    /// The updated account. Adding an existing beneficiary is a no-op.
    pub fn add_beneficiary(
        &self,
        wallet_id: &WalletId,
        beneficiary: &WalletId,
    ) -> Result<Account, AccountError> {
        if wallet_id == beneficiary {
            return Err(AccountError::InvalidBeneficiary(
                "cannot add your own wallet".to_string(),
            ));
        }
        if !self.exists(beneficiary) {
            return Err(AccountError::InvalidBeneficiary(format!(
                "wallet {} does not exist",
                beneficiary
            )));
        }

        self.update(wallet_id, |account| {
            if !account.beneficiaries.contains(beneficiary) {
                account.beneficiaries.push(beneficiary.clone());
            }
        })
    }

    /// Removes a beneficiary. Removing an unknown beneficiary is a no-op.
    pub fn remove_beneficiary(
        &self,
        wallet_id: &WalletId,
        beneficiary: &WalletId,
    ) -> Result<Account, AccountError> {
        self.update(wallet_id, |account| {
            account.beneficiaries.retain(|b| b != beneficiary);
        })
    }

    pub fn beneficiaries(&self, wallet_id: &WalletId) -> Result<Vec<WalletId>, AccountError> {
        self.get(wallet_id)
            .map(|account| account.beneficiaries)
            .ok_or_else(|| AccountError::AccountNotFound(wallet_id.to_string()))
    }

    /// Grants the Admin role
    pub fn promote(&self, wallet_id: &WalletId) -> Result<Account, AccountError> {
        self.update(wallet_id, |account| account.role = Role::Admin)
    }

    pub fn is_admin(&self, wallet_id: &WalletId) -> bool {
        self.accounts
            .get(wallet_id)
            .map(|entry| entry.is_admin())
            .unwrap_or(false)
    }

    fn update<F>(&self, wallet_id: &WalletId, change: F) -> Result<Account, AccountError>
    where
        F: FnOnce(&mut Account),
    {
        let mut entry = self
            .accounts
            .get_mut(wallet_id)
            .ok_or_else(|| AccountError::AccountNotFound(wallet_id.to_string()))?;

        let mut updated = entry.value().clone();
        change(&mut updated);
        self.persist(&updated)?;

        *entry.value_mut() = updated.clone();
        Ok(updated)
    }

    fn persist(&self, account: &Account) -> Result<(), AccountError> {
        if let Some(storage) = &self.storage {
            storage.save_account(account)?;
        }
        Ok(())
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn required(field: &'static str, value: &str) -> Result<String, AccountError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AccountError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register() {
        let registry = AccountRegistry::new();
        let (account, keypair) = registry
            .register("Ayesha Khan", "ayesha@example.com", "35202-1234567-1")
            .unwrap();

        assert_eq!(&account.wallet_id, keypair.wallet_id());
        assert_eq!(account.public_key, keypair.public_key_hex());
        assert_eq!(account.role, Role::User);
        assert!(account.beneficiaries.is_empty());
        assert_eq!(registry.get(&account.wallet_id), Some(account));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let registry = AccountRegistry::new();
        registry.register("A", "same@example.com", "1").unwrap();

        let result = registry.register("B", " SAME@example.com ", "2");
        assert!(matches!(result, Err(AccountError::EmailTaken(_))));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_invalid_fields() {
        let registry = AccountRegistry::new();

        assert!(matches!(
            registry.register("", "a@example.com", "1"),
            Err(AccountError::InvalidField { field: "full_name", .. })
        ));
        assert!(matches!(
            registry.register("A", "not-an-email", "1"),
            Err(AccountError::InvalidField { field: "email", .. })
        ));
        assert!(matches!(
            registry.register("A", "a@example.com", "  "),
            Err(AccountError::InvalidField { field: "cnic", .. })
        ));
    }

    #[test]
    fn test_beneficiaries() {
        let registry = AccountRegistry::new();
        let (alice, _) = registry.register("Alice", "alice@example.com", "1").unwrap();
        let (bob, _) = registry.register("Bob", "bob@example.com", "2").unwrap();
        let stranger = KeyPair::generate().wallet_id().clone();

        registry.add_beneficiary(&alice.wallet_id, &bob.wallet_id).unwrap();
        // Idempotent
        let updated = registry.add_beneficiary(&alice.wallet_id, &bob.wallet_id).unwrap();
        assert_eq!(updated.beneficiaries, vec![bob.wallet_id.clone()]);

        assert!(matches!(
            registry.add_beneficiary(&alice.wallet_id, &stranger),
            Err(AccountError::InvalidBeneficiary(_))
        ));
        assert!(matches!(
            registry.add_beneficiary(&alice.wallet_id, &alice.wallet_id),
            Err(AccountError::InvalidBeneficiary(_))
        ));
        assert!(matches!(
            registry.add_beneficiary(&stranger, &bob.wallet_id),
            Err(AccountError::AccountNotFound(_))
        ));

        registry.remove_beneficiary(&alice.wallet_id, &bob.wallet_id).unwrap();
        assert!(registry.beneficiaries(&alice.wallet_id).unwrap().is_empty());
    }

    #[test]
    fn test_promote() {
        let registry = AccountRegistry::new();
        let (account, _) = registry.register("Admin", "admin@example.com", "0").unwrap();

        assert!(!registry.is_admin(&account.wallet_id));
        registry.promote(&account.wallet_id).unwrap();
        assert!(registry.is_admin(&account.wallet_id));
    }

    #[test]
    fn test_restored_from_storage() {
        let storage = Arc::new(LedgerStorage::temporary().unwrap());
        let registry = AccountRegistry::with_storage(storage.clone()).unwrap();
        let (account, _) = registry.register("Persisted", "p@example.com", "9").unwrap();
        registry.promote(&account.wallet_id).unwrap();

        let restored = AccountRegistry::with_storage(storage).unwrap();
        assert!(restored.is_admin(&account.wallet_id));
        assert!(matches!(
            restored.register("Again", "p@example.com", "9"),
            Err(AccountError::EmailTaken(_))
        ));
    }
}
