use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::account::Role;

/// Request for the register endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,

    /// National identity number
    pub cnic: String,
}

/// A freshly generated wallet. The private key is shown once and not stored.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    pub message: String,
    pub wallet_id: String,

    /// Hex encoded secret key
    pub private_key: String,
}

/// First login step
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub wallet_id: String,

    /// Hex encoded secret key of the wallet
    pub private_key: String,
}

/// Second login step
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpRequest {
    pub wallet_id: String,
    pub otp: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub status: String,
    pub message: String,
}

impl MessageResponse {
    pub fn new(status: &str, message: impl Into<String>) -> Self {
        MessageResponse {
            status: status.to_string(),
            message: message.into(),
        }
    }
}

/// Successful OTP verification
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub status: String,
    pub message: String,

    /// Bearer token for admin routes
    pub token: String,
    pub role: Role,

    /// Token expiry, seconds since the Unix epoch
    pub expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub wallet_id: String,
    pub balance: u64,
}

/// Request for the send endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendRequest {
    #[serde(alias = "sender_wallet_id")]
    pub sender_id: String,

    #[serde(alias = "receiver_wallet_id")]
    pub receiver_id: String,

    /// Amount in whole coin units
    pub amount: u64,

    /// Sender's hex encoded secret key, used to sign and then dropped
    pub private_key: String,

    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    pub status: String,
    pub message: String,
    pub transaction_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,
    pub blocks: usize,

    /// Set when startup recovery found a bad block; the ledger is read-only
    pub compromised: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    pub full_name: String,
    pub email: String,
    pub cnic: String,
    pub wallet_id: String,
    pub beneficiaries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BeneficiaryRequest {
    pub wallet_id: String,
    pub beneficiary_wallet_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub total_users: usize,
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub total_coins_mined: u64,
    pub pending_transactions: usize,
    pub difficulty: u32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminUserResponse {
    pub full_name: String,
    pub email: String,
    pub wallet_id: String,
    pub created_at: i64,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PromoteRequest {
    #[serde(alias = "wallet_id")]
    pub target_wallet_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MintRequest {
    #[serde(alias = "wallet_id")]
    pub target_wallet_id: String,
    pub amount: u64,

    #[serde(default)]
    pub note: Option<String>,
}

/// Paging for the logs endpoint
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    /// Maximum number of entries
    pub limit: Option<usize>,

    /// Entries to skip, counted from the newest
    pub offset: Option<usize>,
}
