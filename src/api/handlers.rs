use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, info};

use std::str::FromStr;

use super::error::ApiError;
use super::schema::{
    AdminUserResponse, BalanceResponse, BeneficiaryRequest, LoginRequest, LoginResponse,
    LogsQuery, MessageResponse, MintRequest, OtpRequest, ProfileResponse, PromoteRequest,
    RegisterRequest, SendRequest, SendResponse, StatsResponse, ValidationResponse, WalletResponse,
};
use super::AppState;
use crate::audit::AuditAction;
use crate::blockchain::crypto::{generate_keypair, KeyPair, WalletId};
use crate::blockchain::pool::RejectionReason;
use crate::blockchain::{Transaction, TransactionKind};

/// Shared application state
pub type AppData = web::Data<AppState>;

fn client_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info().realip_remote_addr().map(str::to_string)
}

fn parse_wallet(value: &str) -> Result<WalletId, ApiError> {
    WalletId::from_str(value).map_err(|_| ApiError::BadRequest(format!("Invalid wallet id: {}", value)))
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Resolves the caller to an Admin wallet or records the denial
fn require_admin(state: &AppState, req: &HttpRequest) -> Result<WalletId, ApiError> {
    let token = bearer_token(req).unwrap_or_default();

    state.auth.require_admin(&token).map_err(|err| {
        state.audit.failure(
            AuditAction::AdminAccessDenied,
            format!("{} {}: {}", req.method(), req.path(), err),
            client_ip(req),
        );
        ApiError::from(err)
    })
}

/// Register a new user
///
/// Creates an account and its wallet. The private key is returned once and
/// never stored.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered", body = WalletResponse),
        (status = 400, description = "Missing or invalid field", body = String),
        (status = 409, description = "Email already exists", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    state: AppData,
    req: HttpRequest,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);

    match state.registry.register(&body.full_name, &body.email, &body.cnic) {
        Ok((account, keypair)) => {
            info!("Registered wallet {}", account.wallet_id);
            state.audit.success(
                AuditAction::UserRegistered,
                format!("User {} registered with wallet {}", account.email, account.wallet_id),
                ip,
            );

            Ok(HttpResponse::Ok().json(WalletResponse {
                message: "User registered successfully".to_string(),
                wallet_id: account.wallet_id.to_string(),
                private_key: keypair.export_secret_hex(),
            }))
        }
        Err(err) => {
            state.audit.failure(
                AuditAction::UserRegistered,
                format!("Registration for {} failed: {}", body.email, err),
                ip,
            );
            Err(err.into())
        }
    }
}

/// Generate an anonymous wallet
///
/// The wallet is not registered and the private key is not kept
#[utoipa::path(
    post,
    path = "/api/auth/generate",
    responses(
        (status = 200, description = "Wallet generated", body = WalletResponse)
    ),
    tag = "auth"
)]
pub async fn generate_wallet(state: AppData, req: HttpRequest) -> HttpResponse {
    let keypair = generate_keypair();

    state.audit.success(
        AuditAction::WalletGenerated,
        format!("Wallet {} generated anonymously", keypair.wallet_id()),
        client_ip(&req),
    );

    HttpResponse::Ok().json(WalletResponse {
        message: "Wallet generated".to_string(),
        wallet_id: keypair.wallet_id().to_string(),
        private_key: keypair.export_secret_hex(),
    })
}

/// Start a login
///
/// Sends a one-time code to the account's email. The response is the same
/// whether or not the wallet is registered.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login accepted", body = MessageResponse),
        (status = 400, description = "Malformed wallet id or key", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    state: AppData,
    req: HttpRequest,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    state
        .auth
        .begin_login(&body.wallet_id, &body.private_key, client_ip(&req))
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "otp_sent",
        "If the wallet is registered, an OTP has been sent to its email",
    )))
}

/// Complete a login
#[utoipa::path(
    post,
    path = "/api/auth/verify-otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Missing, expired, wrong or reused OTP", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    state: AppData,
    req: HttpRequest,
    body: web::Json<OtpRequest>,
) -> Result<HttpResponse, ApiError> {
    let session = state.auth.verify_otp(&body.wallet_id, &body.otp, client_ip(&req))?;

    Ok(HttpResponse::Ok().json(LoginResponse {
        status: "success".to_string(),
        message: "Login successful".to_string(),
        token: session.token,
        role: session.role,
        expires_at: session.expires_at,
    }))
}

/// Get wallet balance
#[utoipa::path(
    get,
    path = "/api/wallet/{id}/balance",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 400, description = "Invalid wallet id", body = String)
    ),
    tag = "wallet"
)]
pub async fn get_balance(
    state: AppData,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let wallet = parse_wallet(&path)?;
    let balance = state.ledger.balance_of(&wallet);

    state.audit.success(
        AuditAction::BalanceQueried,
        format!("Balance queried for {}", wallet),
        client_ip(&req),
    );

    Ok(HttpResponse::Ok().json(BalanceResponse {
        wallet_id: wallet.to_string(),
        balance,
    }))
}

/// Get wallet history
///
/// Committed transactions involving the wallet, oldest first
#[utoipa::path(
    get,
    path = "/api/wallet/{id}/history",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Transactions, oldest first", body = Vec<Transaction>),
        (status = 400, description = "Invalid wallet id", body = String)
    ),
    tag = "wallet"
)]
pub async fn get_history(state: AppData, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let wallet = parse_wallet(&path)?;
    Ok(HttpResponse::Ok().json(state.ledger.history_of(&wallet)))
}

/// Send coins
///
/// Signs the transfer with the supplied key and stages it for mining. The
/// key is not kept.
#[utoipa::path(
    post,
    path = "/api/wallet/send",
    request_body = SendRequest,
    responses(
        (status = 200, description = "Transaction accepted into the pool", body = SendResponse),
        (status = 400, description = "Transaction rejected", body = String),
        (status = 503, description = "Ledger is read-only", body = String)
    ),
    tag = "wallet"
)]
pub async fn send(
    state: AppData,
    req: HttpRequest,
    body: web::Json<SendRequest>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);
    let body = body.into_inner();

    match stage_transfer(&state, &body) {
        Ok(tx) => {
            info!("Accepted transaction {} into the pool", tx.id);
            state.audit.success(
                AuditAction::TransactionSubmitted,
                format!(
                    "Transaction {}: {} -> {} amount {}",
                    tx.id, tx.sender, tx.receiver, tx.amount
                ),
                ip,
            );

            Ok(HttpResponse::Ok().json(SendResponse {
                status: "pending".to_string(),
                message: "Transaction accepted and waiting to be mined".to_string(),
                transaction_id: tx.id,
            }))
        }
        Err(err) => {
            debug!("Rejected transaction from {}: {}", body.sender_id, err);
            state.audit.failure(
                AuditAction::TransactionRejected,
                format!(
                    "Transaction {} -> {} amount {} rejected: {}",
                    body.sender_id, body.receiver_id, body.amount, err
                ),
                ip,
            );
            Err(err)
        }
    }
}

fn stage_transfer(state: &AppState, body: &SendRequest) -> Result<Transaction, ApiError> {
    let sender = parse_wallet(&body.sender_id)?;
    let receiver = parse_wallet(&body.receiver_id)?;

    let keypair = KeyPair::from_secret_hex(&body.private_key)
        .map_err(|_| ApiError::BadRequest("Invalid private key".to_string()))?;

    // A key for some other wallet can never produce a valid signature
    if *keypair.wallet_id() != sender {
        return Err(RejectionReason::InvalidSignature.into());
    }

    let tx = Transaction::new_transfer(&keypair, receiver, body.amount, body.note.clone())?;
    state.pool.submit(tx.clone())?;
    Ok(tx)
}

/// List blocks
#[utoipa::path(
    get,
    path = "/api/blockchain/blocks",
    responses(
        (status = 200, description = "All blocks, index ascending", body = Vec<Block>)
    ),
    tag = "blockchain"
)]
pub async fn get_blocks(state: AppData) -> HttpResponse {
    HttpResponse::Ok().json(state.ledger.blocks())
}

/// List pending transactions
///
/// Transactions accepted into the pool and not yet mined
#[utoipa::path(
    get,
    path = "/api/blockchain/pending",
    responses(
        (status = 200, description = "Pending transactions, oldest first", body = Vec<Transaction>)
    ),
    tag = "blockchain"
)]
pub async fn get_pending(state: AppData) -> HttpResponse {
    HttpResponse::Ok().json(state.pool.pending())
}

/// Check the ledger
///
/// Recomputes every block hash and link
#[utoipa::path(
    get,
    path = "/api/blockchain/validate",
    responses(
        (status = 200, description = "Integrity status", body = ValidationResponse)
    ),
    tag = "blockchain"
)]
pub async fn validate_chain(state: AppData, req: HttpRequest) -> HttpResponse {
    let valid = state.ledger.verify_chain();
    let blocks = state.ledger.len();
    let details = format!("Verified {} blocks: {}", blocks, if valid { "valid" } else { "invalid" });

    if valid {
        state.audit.success(AuditAction::ChainVerified, details, client_ip(&req));
    } else {
        state.audit.failure(AuditAction::ChainVerified, details, client_ip(&req));
    }

    HttpResponse::Ok().json(ValidationResponse {
        valid,
        blocks,
        compromised: state.ledger.is_compromised(),
    })
}

/// Trigger mining
///
/// Wakes the miner. Blocks are produced in the background.
#[utoipa::path(
    post,
    path = "/api/blockchain/mine",
    responses(
        (status = 202, description = "Miner triggered", body = MessageResponse),
        (status = 503, description = "Ledger is read-only", body = String)
    ),
    tag = "blockchain"
)]
pub async fn mine(state: AppData) -> Result<HttpResponse, ApiError> {
    if state.ledger.is_compromised() {
        return Err(RejectionReason::LedgerUnavailable.into());
    }

    state.miner.trigger();
    Ok(HttpResponse::Accepted().json(MessageResponse::new(
        "mining",
        format!("Miner triggered with {} pending transactions", state.pool.len()),
    )))
}

/// Get user profile
#[utoipa::path(
    get,
    path = "/api/user/{id}/profile",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "user"
)]
pub async fn get_profile(state: AppData, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let wallet = parse_wallet(&path)?;
    let account = state
        .registry
        .get(&wallet)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(HttpResponse::Ok().json(ProfileResponse {
        full_name: account.full_name,
        email: account.email,
        cnic: account.cnic,
        wallet_id: account.wallet_id.to_string(),
        beneficiaries: account.beneficiaries.iter().map(|b| b.to_string()).collect(),
    }))
}

/// List beneficiaries
#[utoipa::path(
    get,
    path = "/api/user/{id}/beneficiaries",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Beneficiary wallet ids", body = Vec<String>),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "user"
)]
pub async fn get_beneficiaries(
    state: AppData,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let wallet = parse_wallet(&path)?;
    let beneficiaries: Vec<String> = state
        .registry
        .beneficiaries(&wallet)?
        .iter()
        .map(|b| b.to_string())
        .collect();

    Ok(HttpResponse::Ok().json(beneficiaries))
}

/// Add a beneficiary
#[utoipa::path(
    post,
    path = "/api/user/beneficiary",
    request_body = BeneficiaryRequest,
    responses(
        (status = 200, description = "Beneficiary added", body = String),
        (status = 400, description = "Beneficiary does not exist or is the same wallet", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "user"
)]
pub async fn add_beneficiary(
    state: AppData,
    req: HttpRequest,
    body: web::Json<BeneficiaryRequest>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);

    let added = parse_beneficiary(&body).and_then(|(wallet, beneficiary)| {
        state.registry.add_beneficiary(&wallet, &beneficiary)?;
        Ok((wallet, beneficiary))
    });

    match added {
        Ok((wallet, beneficiary)) => {
            state.audit.success(
                AuditAction::BeneficiaryAdded,
                format!("{} added beneficiary {}", wallet, beneficiary),
                ip,
            );
            Ok(HttpResponse::Ok().json("Beneficiary added successfully"))
        }
        Err(err) => {
            state.audit.failure(
                AuditAction::BeneficiaryAdded,
                format!(
                    "{} could not add beneficiary {}: {}",
                    body.wallet_id, body.beneficiary_wallet_id, err
                ),
                ip,
            );
            Err(err)
        }
    }
}

fn parse_beneficiary(body: &BeneficiaryRequest) -> Result<(WalletId, WalletId), ApiError> {
    Ok((parse_wallet(&body.wallet_id)?, parse_wallet(&body.beneficiary_wallet_id)?))
}

/// Remove a beneficiary
#[utoipa::path(
    delete,
    path = "/api/user/beneficiary",
    request_body = BeneficiaryRequest,
    responses(
        (status = 200, description = "Beneficiary removed", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "user"
)]
pub async fn remove_beneficiary(
    state: AppData,
    req: HttpRequest,
    body: web::Json<BeneficiaryRequest>,
) -> Result<HttpResponse, ApiError> {
    let ip = client_ip(&req);

    let removed = parse_beneficiary(&body).and_then(|(wallet, beneficiary)| {
        state.registry.remove_beneficiary(&wallet, &beneficiary)?;
        Ok((wallet, beneficiary))
    });

    match removed {
        Ok((wallet, beneficiary)) => {
            state.audit.success(
                AuditAction::BeneficiaryRemoved,
                format!("{} removed beneficiary {}", wallet, beneficiary),
                ip,
            );
            Ok(HttpResponse::Ok().json("Beneficiary removed successfully"))
        }
        Err(err) => {
            state.audit.failure(
                AuditAction::BeneficiaryRemoved,
                format!(
                    "{} could not remove beneficiary {}: {}",
                    body.wallet_id, body.beneficiary_wallet_id, err
                ),
                ip,
            );
            Err(err)
        }
    }
}

/// System statistics
#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses(
        (status = 200, description = "Ledger totals", body = StatsResponse),
        (status = 401, description = "Missing or expired token", body = String),
        (status = 403, description = "Admin access required", body = String)
    ),
    security(("bearer_token" = [])),
    tag = "admin"
)]
pub async fn get_stats(state: AppData, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let admin = require_admin(&state, &req)?;
    let stats = state.ledger.stats();

    state.audit.success(
        AuditAction::AdminStatsQueried,
        format!("Stats queried by {}", admin),
        client_ip(&req),
    );

    Ok(HttpResponse::Ok().json(StatsResponse {
        total_users: state.registry.count(),
        total_blocks: stats.total_blocks,
        total_transactions: stats.total_transactions,
        total_coins_mined: stats.total_coins_mined,
        pending_transactions: state.pool.len(),
        difficulty: state.ledger.difficulty(),
    }))
}

/// List all users
#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "Registered users, oldest first", body = Vec<AdminUserResponse>),
        (status = 401, description = "Missing or expired token", body = String),
        (status = 403, description = "Admin access required", body = String)
    ),
    security(("bearer_token" = [])),
    tag = "admin"
)]
pub async fn get_users(state: AppData, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let admin = require_admin(&state, &req)?;

    let users: Vec<AdminUserResponse> = state
        .registry
        .all()
        .into_iter()
        .map(|account| AdminUserResponse {
            full_name: account.full_name,
            email: account.email,
            wallet_id: account.wallet_id.to_string(),
            created_at: account.created_at,
            role: account.role,
        })
        .collect();

    state.audit.success(
        AuditAction::AdminUsersQueried,
        format!("User list queried by {}", admin),
        client_ip(&req),
    );

    Ok(HttpResponse::Ok().json(users))
}

/// Promote a user to Admin
#[utoipa::path(
    post,
    path = "/api/admin/promote",
    request_body = PromoteRequest,
    responses(
        (status = 200, description = "User promoted", body = String),
        (status = 403, description = "Admin access required", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    security(("bearer_token" = [])),
    tag = "admin"
)]
pub async fn promote(
    state: AppData,
    req: HttpRequest,
    body: web::Json<PromoteRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin = require_admin(&state, &req)?;
    let ip = client_ip(&req);

    let promoted = parse_wallet(&body.target_wallet_id).and_then(|target| {
        state.registry.promote(&target)?;
        Ok(target)
    });

    match promoted {
        Ok(target) => {
            info!("{} promoted {} to Admin", admin, target);
            state.audit.success(
                AuditAction::AdminPromoted,
                format!("{} promoted {} to Admin", admin, target),
                ip,
            );
            Ok(HttpResponse::Ok().json("User promoted to Admin"))
        }
        Err(err) => {
            state.audit.failure(
                AuditAction::AdminPromoted,
                format!("{} could not promote {}: {}", admin, body.target_wallet_id, err),
                ip,
            );
            Err(err)
        }
    }
}

/// Mint coins
///
/// Stages an authority signed mint to a registered wallet and wakes the miner
#[utoipa::path(
    post,
    path = "/api/admin/mint",
    request_body = MintRequest,
    responses(
        (status = 200, description = "Mint accepted into the pool", body = SendResponse),
        (status = 400, description = "Invalid amount", body = String),
        (status = 403, description = "Admin access required", body = String),
        (status = 404, description = "Target wallet not found", body = String)
    ),
    security(("bearer_token" = [])),
    tag = "admin"
)]
pub async fn mint(
    state: AppData,
    req: HttpRequest,
    body: web::Json<MintRequest>,
) -> Result<HttpResponse, ApiError> {
    let admin = require_admin(&state, &req)?;
    let ip = client_ip(&req);

    match stage_mint(&state, &admin, &body) {
        Ok((target, transaction_id)) => {
            state.miner.trigger();
            state.audit.success(
                AuditAction::CoinsMinted,
                format!("{} minted {} coins to {}", admin, body.amount, target),
                ip,
            );

            Ok(HttpResponse::Ok().json(SendResponse {
                status: "pending".to_string(),
                message: format!("Minting {} coins to {}", body.amount, target),
                transaction_id,
            }))
        }
        Err(err) => {
            state.audit.failure(
                AuditAction::CoinsMinted,
                format!(
                    "Mint of {} coins to {} rejected: {}",
                    body.amount, body.target_wallet_id, err
                ),
                ip,
            );
            Err(err)
        }
    }
}

fn stage_mint(
    state: &AppState,
    admin: &WalletId,
    body: &MintRequest,
) -> Result<(WalletId, String), ApiError> {
    let target = parse_wallet(&body.target_wallet_id)?;

    if !state.registry.exists(&target) {
        return Err(ApiError::NotFound("Target wallet not found".to_string()));
    }

    let note = body
        .note
        .clone()
        .or_else(|| Some(format!("Minted by admin {}", admin)));
    let tx = Transaction::new_system(
        TransactionKind::Mint,
        &state.authority,
        target.clone(),
        body.amount,
        note,
    )?;

    let accepted = state.pool.submit_system(tx)?;
    Ok((target, accepted.id))
}

/// System logs
///
/// Audit entries, newest first
#[utoipa::path(
    get,
    path = "/api/logs",
    params(LogsQuery),
    responses(
        (status = 200, description = "Audit entries, newest first", body = Vec<LogEntry>)
    ),
    tag = "logs"
)]
pub async fn get_logs(state: AppData, query: web::Query<LogsQuery>) -> HttpResponse {
    HttpResponse::Ok().json(state.audit.page(query.limit, query.offset))
}
