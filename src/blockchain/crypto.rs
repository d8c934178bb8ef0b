use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Sender used by mining reward transactions
pub const SYSTEM_REWARD: &str = "SYSTEM_REWARD";

/// Sender used by admin mint transactions
pub const SYSTEM_MINT: &str = "SYSTEM_MINT";

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid wallet id: {0}")]
    InvalidWalletId(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Hex encoded SHA-256 digest of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Identifies a wallet: the hex SHA-256 of its Ed25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct WalletId(pub String);

impl WalletId {
    /// Derives the wallet id from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        WalletId(sha256_hex(public_key.as_bytes()))
    }

    pub fn system_reward() -> Self {
        WalletId(SYSTEM_REWARD.to_string())
    }

    pub fn system_mint() -> Self {
        WalletId(SYSTEM_MINT.to_string())
    }

    /// Whether this is one of the reserved system senders
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_REWARD || self.0 == SYSTEM_MINT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WalletId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let is_hex = s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit());

        if !is_hex {
            return Err(CryptoError::InvalidWalletId(format!(
                "expected 64 hex characters, got {:?}",
                s
            )));
        }

        Ok(WalletId(s.to_ascii_lowercase()))
    }
}

/// Represents a digital signature (base58 encoded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        let bytes = signature.to_bytes();
        DigitalSignature(bs58::encode(bytes).into_string())
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A signing key and the wallet id derived from it.
///
/// The server never persists user key pairs; the only key pair it keeps is
/// the node authority key used for system transactions.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    wallet_id: WalletId,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("wallet_id", &self.wallet_id)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Creates a new key pair from the OS random number generator
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Restores a key pair from its 32-byte secret
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    /// Restores a key pair from a hex encoded secret, as handed to clients
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|_| {
            CryptoError::InvalidPrivateKey("Private key must be a hex string".to_string())
        })?;

        Self::from_secret_key(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let wallet_id = WalletId::from_public_key(&verifying_key);

        KeyPair {
            signing_key,
            verifying_key,
            wallet_id,
        }
    }

    pub fn wallet_id(&self) -> &WalletId {
        &self.wallet_id
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Signs a message with the private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    /// Exports the secret key as hex. Returned to the owner once, never stored.
    pub fn export_secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn export_secret_key(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

/// Produces a fresh key pair
pub fn generate_keypair() -> KeyPair {
    KeyPair::generate()
}

/// Parses a hex encoded Ed25519 public key
pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidPublicKey("Invalid public key length".to_string())
    })?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies a signature against a message and public key.
///
/// Malformed signatures verify as `false`.
pub fn verify(public_key: &VerifyingKey, payload: &[u8], signature: &DigitalSignature) -> bool {
    match signature.to_signature() {
        Ok(signature) => public_key.verify(payload, &signature).is_ok(),
        Err(_) => false,
    }
}

/// Verifies a signature made by the owner of `wallet_id`.
///
/// The public key must hash to the wallet id and the signature must verify.
/// Any decoding problem yields `false`.
pub fn verify_for_wallet(
    wallet_id: &WalletId,
    public_key_hex: &str,
    payload: &[u8],
    signature: &DigitalSignature,
) -> bool {
    let public_key = match parse_public_key(public_key_hex) {
        Ok(key) => key,
        Err(_) => return false,
    };

    if WalletId::from_public_key(&public_key) != *wallet_id {
        return false;
    }

    verify(&public_key, payload, signature)
}
