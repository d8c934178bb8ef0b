use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Fixed genesis timestamp (2024-01-01T00:00:00Z)
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200;

/// Represents a block in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Seconds since the Unix epoch
    pub timestamp: i64,

    /// Transactions in insertion order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Hash of this block
    pub hash: String,
}

/// The fields covered by the block hash
#[derive(Serialize)]
struct HashInput<'a> {
    index: u64,
    timestamp: i64,
    transactions: &'a [Transaction],
    previous_hash: &'a str,
    nonce: u64,
}

impl Block {
    /// Creates an unsealed candidate with nonce 0
    pub fn candidate(index: u64, timestamp: i64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The fixed first block. It is never mined.
    pub fn genesis() -> Self {
        Self::candidate(0, GENESIS_TIMESTAMP, Vec::new(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// SHA-256 over (index, timestamp, transactions, previous_hash, nonce)
    pub fn hash_bytes(&self) -> [u8; 32] {
        let input = HashInput {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        };

        let mut hasher = Sha256::new();
        // Serializing plain structs and strings into a Vec cannot fail
        if let Ok(bytes) = serde_json::to_vec(&input) {
            hasher.update(&bytes);
        }
        hasher.finalize().into()
    }

    /// Calculates the hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        hex::encode(self.hash_bytes())
    }

    /// Whether the stored hash satisfies a target of `difficulty` leading zero bits
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        match hex::decode(&self.hash) {
            Ok(bytes) => leading_zero_bits(&bytes) >= difficulty,
            Err(_) => false,
        }
    }

    /// Whether the stored hash matches the block's contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}

/// Counts the leading zero bits of a big-endian digest
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut total = 0u32;
    for byte in hash {
        if *byte == 0 {
            total += 8;
        } else {
            total += byte.leading_zeros();
            break;
        }
    }
    total
}
