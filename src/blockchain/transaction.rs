use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{self, sha256_hex, CryptoError, DigitalSignature, KeyPair, WalletId};

/// Errors that can occur while building or checking a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Sender and receiver must differ")]
    SelfTransfer,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid sender: {0}")]
    InvalidSender(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// What a transaction does to balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Moves coins between two wallets
    Transfer,
    /// Mining reward; credits the miner wallet only
    Reward,
    /// Admin issued coins; credits the receiver only
    Mint,
}

impl TransactionKind {
    fn system_sender(self) -> Option<WalletId> {
        match self {
            TransactionKind::Transfer => None,
            TransactionKind::Reward => Some(WalletId::system_reward()),
            TransactionKind::Mint => Some(WalletId::system_mint()),
        }
    }
}

/// A signed, immutable transfer of coins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Content hash of the signed fields
    pub id: String,

    pub kind: TransactionKind,

    /// Sender's wallet id
    #[serde(rename = "sender_wallet_id")]
    #[schema(value_type = String)]
    pub sender: WalletId,

    /// Receiver's wallet id
    #[serde(rename = "receiver_wallet_id")]
    #[schema(value_type = String)]
    pub receiver: WalletId,

    /// Amount in whole coin units
    pub amount: u64,

    pub note: Option<String>,

    /// Seconds since the Unix epoch
    pub timestamp: i64,

    /// Hex encoded public key of the signer
    pub sender_public_key: String,

    #[schema(value_type = String)]
    pub signature: DigitalSignature,
}

/// Canonical, order-stable view of the signed fields
#[derive(Serialize)]
struct SigningPayload<'a> {
    kind: TransactionKind,
    sender: &'a str,
    receiver: &'a str,
    amount: u64,
    timestamp: i64,
    note: Option<&'a str>,
}

impl Transaction {
    /// Creates and signs a transfer from the key pair's wallet
    pub fn new_transfer(
        sender: &KeyPair,
        receiver: WalletId,
        amount: u64,
        note: Option<String>,
    ) -> Result<Self, TransactionError> {
        Self::new_transfer_at(sender, receiver, amount, note, Utc::now().timestamp())
    }

    pub fn new_transfer_at(
        sender: &KeyPair,
        receiver: WalletId,
        amount: u64,
        note: Option<String>,
        timestamp: i64,
    ) -> Result<Self, TransactionError> {
        Self::build(TransactionKind::Transfer, sender.wallet_id().clone(), sender, receiver, amount, note, timestamp)
    }

    /// Creates a reward or mint transaction signed by the node authority
    pub fn new_system(
        kind: TransactionKind,
        authority: &KeyPair,
        receiver: WalletId,
        amount: u64,
        note: Option<String>,
    ) -> Result<Self, TransactionError> {
        let sender = kind.system_sender().ok_or_else(|| {
            TransactionError::InvalidSender("transfers cannot be system transactions".to_string())
        })?;

        Self::build(kind, sender, authority, receiver, amount, note, Utc::now().timestamp())
    }

    fn build(
        kind: TransactionKind,
        sender: WalletId,
        signer: &KeyPair,
        receiver: WalletId,
        amount: u64,
        note: Option<String>,
        timestamp: i64,
    ) -> Result<Self, TransactionError> {
        let note = note.filter(|n| !n.trim().is_empty());

        let mut transaction = Transaction {
            id: String::new(),
            kind,
            sender,
            receiver,
            amount,
            note,
            timestamp,
            sender_public_key: signer.public_key_hex(),
            signature: DigitalSignature(String::new()),
        };

        let message = transaction.signing_bytes()?;
        transaction.id = sha256_hex(&message);
        transaction.signature = signer.sign(&message);

        Ok(transaction)
    }

    /// Serializes the signed fields in a fixed order
    pub fn signing_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let payload = SigningPayload {
            kind: self.kind,
            sender: self.sender.as_str(),
            receiver: self.receiver.as_str(),
            amount: self.amount,
            timestamp: self.timestamp,
            note: self.note.as_deref(),
        };

        serde_json::to_vec(&payload).map_err(|e| TransactionError::SerializationError(e.to_string()))
    }

    /// Recomputes the content hash
    #[cfg(test)]
    pub fn calculate_id(&self) -> Result<String, TransactionError> {
        Ok(sha256_hex(&self.signing_bytes()?))
    }

    /// Shape checks that need no key material or ledger state
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        if self.amount == 0 {
            return Err(TransactionError::InvalidAmount(
                "Amount must be greater than zero".to_string(),
            ));
        }

        if self.sender.0.trim().is_empty() {
            return Err(TransactionError::MissingField("sender_wallet_id"));
        }
        if self.receiver.0.trim().is_empty() {
            return Err(TransactionError::MissingField("receiver_wallet_id"));
        }
        if self.sender == self.receiver {
            return Err(TransactionError::SelfTransfer);
        }
        if self.id.is_empty() {
            return Err(TransactionError::MissingField("id"));
        }
        if self.sender_public_key.is_empty() {
            return Err(TransactionError::MissingField("sender_public_key"));
        }
        if self.signature.is_empty() {
            return Err(TransactionError::MissingField("signature"));
        }

        match self.kind.system_sender() {
            Some(expected) if expected != self.sender => Err(TransactionError::InvalidSender(
                format!("{:?} transactions must come from {}", self.kind, expected),
            )),
            None if self.sender.is_system() => Err(TransactionError::InvalidSender(
                "system wallets cannot send transfers".to_string(),
            )),
            _ if self.receiver.is_system() => Err(TransactionError::InvalidSender(
                "system wallets cannot receive coins".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Checks the id and the signature. Never errors: anything malformed is `false`.
    ///
    /// Transfers must be signed by the key that hashes to the sender wallet id;
    /// system transactions must be signed by the node authority.
    pub fn verify_signature(&self, authority: &VerifyingKey) -> bool {
        let message = match self.signing_bytes() {
            Ok(message) => message,
            Err(_) => return false,
        };

        if sha256_hex(&message) != self.id {
            return false;
        }

        if self.is_system() {
            self.sender_public_key == hex::encode(authority.as_bytes())
                && crypto::verify(authority, &message, &self.signature)
        } else {
            crypto::verify_for_wallet(&self.sender, &self.sender_public_key, &message, &self.signature)
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind != TransactionKind::Transfer
    }

    /// Amount taken from the sender's balance
    pub fn debit(&self) -> u64 {
        if self.is_system() {
            0
        } else {
            self.amount
        }
    }

    /// Whether `wallet` appears on either side
    pub fn involves(&self, wallet: &WalletId) -> bool {
        self.sender == *wallet || self.receiver == *wallet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::generate_keypair;

    #[test]
    fn test_new_transfer() {
        let sender = generate_keypair();
        let receiver = generate_keypair();

        let transaction = Transaction::new_transfer(
            &sender,
            receiver.wallet_id().clone(),
            40,
            Some("rent".to_string()),
        )
        .unwrap();

        assert_eq!(transaction.sender, *sender.wallet_id());
        assert_eq!(transaction.receiver, *receiver.wallet_id());
        assert_eq!(transaction.amount, 40);
        assert_eq!(transaction.id.len(), 64);
        assert_eq!(transaction.id, transaction.calculate_id().unwrap());
        assert!(transaction.validate_structure().is_ok());
        assert!(transaction.verify_signature(generate_keypair().public_key()));
    }

    #[test]
    fn test_id_is_content_hash() {
        let sender = generate_keypair();
        let receiver = generate_keypair().wallet_id().clone();

        let a = Transaction::new_transfer_at(&sender, receiver.clone(), 5, None, 1_700_000_000).unwrap();
        let b = Transaction::new_transfer_at(&sender, receiver.clone(), 5, None, 1_700_000_000).unwrap();
        let c = Transaction::new_transfer_at(&sender, receiver, 6, None, 1_700_000_000).unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let authority = generate_keypair();
        let sender = generate_keypair();
        let receiver = generate_keypair();

        let original =
            Transaction::new_transfer(&sender, receiver.wallet_id().clone(), 10, None).unwrap();

        let mut amount_changed = original.clone();
        amount_changed.amount = 1_000;
        assert!(!amount_changed.verify_signature(authority.public_key()));

        // Re-deriving the id does not help without the sender's key
        amount_changed.id = amount_changed.calculate_id().unwrap();
        assert!(!amount_changed.verify_signature(authority.public_key()));

        let mut note_changed = original.clone();
        note_changed.note = Some("replay".to_string());
        note_changed.id = note_changed.calculate_id().unwrap();
        assert!(!note_changed.verify_signature(authority.public_key()));

        let mut foreign_key = original;
        foreign_key.sender_public_key = receiver.public_key_hex();
        assert!(!foreign_key.verify_signature(authority.public_key()));
    }

    #[test]
    fn test_structural_checks() {
        let sender = generate_keypair();

        let zero = Transaction::new_transfer(&sender, generate_keypair().wallet_id().clone(), 0, None)
            .unwrap();
        assert!(matches!(zero.validate_structure(), Err(TransactionError::InvalidAmount(_))));

        let to_self =
            Transaction::new_transfer(&sender, sender.wallet_id().clone(), 3, None).unwrap();
        assert!(matches!(to_self.validate_structure(), Err(TransactionError::SelfTransfer)));

        let to_system = Transaction::new_transfer(&sender, WalletId::system_mint(), 3, None).unwrap();
        assert!(matches!(
            to_system.validate_structure(),
            Err(TransactionError::InvalidSender(_))
        ));

        let mut unsigned =
            Transaction::new_transfer(&sender, generate_keypair().wallet_id().clone(), 3, None)
                .unwrap();
        unsigned.signature = DigitalSignature(String::new());
        assert!(matches!(
            unsigned.validate_structure(),
            Err(TransactionError::MissingField("signature"))
        ));
    }

    #[test]
    fn test_system_transaction() {
        let authority = generate_keypair();
        let miner = generate_keypair();

        let reward = Transaction::new_system(
            TransactionKind::Reward,
            &authority,
            miner.wallet_id().clone(),
            50,
            Some("Mining reward for block 1".to_string()),
        )
        .unwrap();

        assert_eq!(reward.sender, WalletId::system_reward());
        assert!(reward.is_system());
        assert_eq!(reward.debit(), 0);
        assert!(reward.validate_structure().is_ok());
        assert!(reward.verify_signature(authority.public_key()));
        assert!(!reward.verify_signature(generate_keypair().public_key()));

        assert!(Transaction::new_system(
            TransactionKind::Transfer,
            &authority,
            miner.wallet_id().clone(),
            1,
            None
        )
        .is_err());
    }
}
