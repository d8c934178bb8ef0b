use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::delivery::{DeliveryError, OtpDelivery};
use crate::audit::{AuditAction, AuditLog};
use crate::blockchain::account::{AccountRegistry, Role};
use crate::blockchain::crypto::{KeyPair, WalletId};
use crate::config::AuthConfig;

/// Number of decimal digits in a one-time code
pub const OTP_DIGITS: usize = 6;

/// Errors that can occur during authentication
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No pending login for this wallet")]
    SessionNotFound,

    #[error("OTP expired")]
    Expired,

    #[error("Invalid OTP")]
    CodeMismatch,

    #[error("OTP already used")]
    AlreadyConsumed,

    #[error("Malformed credentials: {0}")]
    MalformedCredentials(String),

    #[error("Missing or expired session token")]
    InvalidToken,

    #[error("Admin role required")]
    Forbidden,
}

impl AuthError {
    /// Short name recorded in audit details
    fn kind(&self) -> &'static str {
        match self {
            AuthError::SessionNotFound => "SessionNotFound",
            AuthError::Expired => "Expired",
            AuthError::CodeMismatch => "CodeMismatch",
            AuthError::AlreadyConsumed => "AlreadyConsumed",
            AuthError::MalformedCredentials(_) => "MalformedCredentials",
            AuthError::InvalidToken => "InvalidToken",
            AuthError::Forbidden => "Forbidden",
        }
    }
}

/// A pending or completed login attempt
#[derive(Clone)]
pub struct AuthSession {
    pub wallet_id: WalletId,
    code: String,

    /// Seconds since the Unix epoch
    pub expires_at: i64,

    pub consumed: bool,

    /// Wrong codes tried so far
    pub failed_attempts: u32,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("wallet_id", &self.wallet_id)
            .field("code", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("consumed", &self.consumed)
            .field("failed_attempts", &self.failed_attempts)
            .finish()
    }
}

/// Bearer token issued after a successful OTP check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionToken {
    pub token: String,

    #[schema(value_type = String)]
    pub wallet_id: WalletId,

    pub role: Role,

    /// Seconds since the Unix epoch
    pub expires_at: i64,
}

/// Two-step login: key proof, then a one-time code
pub struct AuthGateway {
    /// At most one session per wallet; a new login replaces it
    sessions: DashMap<WalletId, AuthSession>,

    tokens: DashMap<String, SessionToken>,

    registry: Arc<AccountRegistry>,
    audit: Arc<AuditLog>,
    delivery: Arc<dyn OtpDelivery>,

    otp_ttl: i64,
    session_ttl: i64,
    max_otp_attempts: u32,
    delivery_timeout: Duration,
}

impl AuthGateway {
    pub fn new(
        config: &AuthConfig,
        registry: Arc<AccountRegistry>,
        audit: Arc<AuditLog>,
        delivery: Arc<dyn OtpDelivery>,
    ) -> Self {
        AuthGateway {
            sessions: DashMap::new(),
            tokens: DashMap::new(),
            registry,
            audit,
            delivery,
            otp_ttl: config.otp_ttl_secs as i64,
            session_ttl: config.session_ttl_secs as i64,
            max_otp_attempts: config.max_otp_attempts,
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs),
        }
    }

    pub async fn begin_login(
        &self,
        wallet_id: &str,
        private_key: &str,
        ip_address: Option<String>,
    ) -> Result<(), AuthError> {
        self.begin_login_at(wallet_id, private_key, ip_address, Utc::now().timestamp())
            .await
    }

    /// First login step
    ///
    /// # Arguments
    ///
    /// * `wallet_id` - The wallet being logged into
    /// * `private_key` - Hex encoded secret key; must derive `wallet_id`
    /// * `ip_address` - Caller address for the audit trail
    /// * `now` - Current time in seconds
    ///
    /// # Returns
    ///
    /// `Ok(())` whether or not a code was sent, so the response does not
    /// reveal which wallets are registered. Only input that cannot be parsed
    /// is an error.
    pub async fn begin_login_at(
        &self,
        wallet_id: &str,
        private_key: &str,
        ip_address: Option<String>,
        now: i64,
    ) -> Result<(), AuthError> {
        let parsed = WalletId::from_str(wallet_id)
            .map_err(|e| AuthError::MalformedCredentials(e.to_string()))
            .and_then(|wallet| {
                KeyPair::from_secret_hex(private_key)
                    .map(|keypair| (wallet, keypair))
                    .map_err(|e| AuthError::MalformedCredentials(e.to_string()))
            });

        let (wallet, keypair) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                self.audit.failure(
                    AuditAction::LoginRequested,
                    format!("Login request rejected: {}", err.kind()),
                    ip_address,
                );
                return Err(err);
            }
        };

        if *keypair.wallet_id() != wallet {
            self.audit.failure(
                AuditAction::LoginRequested,
                format!("Login request for {}: key does not match wallet", wallet),
                ip_address,
            );
            return Ok(());
        }

        let account = match self.registry.get(&wallet) {
            Some(account) => account,
            None => {
                self.audit.failure(
                    AuditAction::LoginRequested,
                    format!("Login request for {}: wallet not registered", wallet),
                    ip_address,
                );
                return Ok(());
            }
        };

        let code = generate_code();
        self.sessions.insert(
            wallet.clone(),
            AuthSession {
                wallet_id: wallet.clone(),
                code: code.clone(),
                expires_at: now + self.otp_ttl,
                consumed: false,
                failed_attempts: 0,
            },
        );
        self.audit.success(
            AuditAction::LoginRequested,
            format!("OTP issued for {}", wallet),
            ip_address.clone(),
        );

        let delivered = tokio::time::timeout(self.delivery_timeout, self.delivery.deliver(&account, &code))
            .await
            .unwrap_or(Err(DeliveryError::TimedOut));

        match delivered {
            Ok(()) => {
                debug!("OTP dispatched for {}", wallet);
                self.audit.success(
                    AuditAction::OtpDispatched,
                    format!("OTP sent to {}", account.email),
                    ip_address,
                );
            }
            Err(e) => {
                warn!("OTP delivery for {} failed: {}", wallet, e);
                self.audit.failure(
                    AuditAction::OtpDeliveryFailed,
                    format!("OTP delivery to {} failed: {}", account.email, e),
                    ip_address,
                );
            }
        }

        Ok(())
    }

    pub fn verify_otp(
        &self,
        wallet_id: &str,
        code: &str,
        ip_address: Option<String>,
    ) -> Result<SessionToken, AuthError> {
        self.verify_otp_at(wallet_id, code, ip_address, Utc::now().timestamp())
    }

    /// Second login step
    ///
    /// # Arguments
    ///
    /// * `wallet_id` - The wallet being logged into
    /// * `code` - The one-time code delivered in step one
    /// * `ip_address` - Caller address for the audit trail
    /// * `now` - Current time in seconds
    ///
    /// # Returns
    ///
    /// A bearer token on success. Every other path issues nothing. A wrong
    /// code counts against the session, which is burned once the attempt
    /// limit is reached; no other failure changes it.
    pub fn verify_otp_at(
        &self,
        wallet_id: &str,
        code: &str,
        ip_address: Option<String>,
        now: i64,
    ) -> Result<SessionToken, AuthError> {
        match self.check_code(wallet_id, code, now) {
            Ok(wallet) => {
                let token = self.issue_token(wallet, now);
                info!("Wallet {} logged in", token.wallet_id);
                self.audit.success(
                    AuditAction::LoginSucceeded,
                    format!("Wallet {} logged in", token.wallet_id),
                    ip_address,
                );
                Ok(token)
            }
            Err(err) => {
                self.audit.failure(
                    AuditAction::LoginFailed,
                    format!("OTP verification for {} failed: {}", wallet_id, err.kind()),
                    ip_address,
                );
                Err(err)
            }
        }
    }

    fn check_code(&self, wallet_id: &str, code: &str, now: i64) -> Result<WalletId, AuthError> {
        let wallet = WalletId::from_str(wallet_id)
            .map_err(|e| AuthError::MalformedCredentials(e.to_string()))?;

        let mut session = self
            .sessions
            .get_mut(&wallet)
            .ok_or(AuthError::SessionNotFound)?;

        if session.consumed {
            return Err(AuthError::AlreadyConsumed);
        }
        if now > session.expires_at {
            return Err(AuthError::Expired);
        }
        if session.code != code.trim() {
            session.failed_attempts += 1;
            if session.failed_attempts >= self.max_otp_attempts {
                warn!("Too many wrong codes for {}; login must be restarted", wallet);
                session.consumed = true;
            }
            return Err(AuthError::CodeMismatch);
        }

        session.consumed = true;
        Ok(wallet)
    }

    fn issue_token(&self, wallet_id: WalletId, now: i64) -> SessionToken {
        let role = self
            .registry
            .get(&wallet_id)
            .map(|account| account.role)
            .unwrap_or_default();

        let token = SessionToken {
            token: Uuid::new_v4().to_string(),
            wallet_id,
            role,
            expires_at: now + self.session_ttl,
        };
        self.tokens.insert(token.token.clone(), token.clone());
        token
    }

    /// Looks up a live bearer token
    pub fn authenticate_at(&self, token: &str, now: i64) -> Result<SessionToken, AuthError> {
        let session = self
            .tokens
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidToken)?;

        if now > session.expires_at {
            self.tokens.remove(token);
            return Err(AuthError::InvalidToken);
        }

        Ok(session)
    }

    pub fn require_admin(&self, token: &str) -> Result<WalletId, AuthError> {
        self.require_admin_at(token, Utc::now().timestamp())
    }

    /// Resolves a bearer token to an account that currently holds the Admin role
    pub fn require_admin_at(&self, token: &str, now: i64) -> Result<WalletId, AuthError> {
        let session = self.authenticate_at(token, now)?;
        if self.registry.is_admin(&session.wallet_id) {
            Ok(session.wallet_id)
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Drops expired sessions and tokens
    ///
    /// # Returns
    ///
    /// How many entries were removed
    pub fn sweep_expired(&self, now: i64) -> usize {
        let before = self.sessions.len() + self.tokens.len();
        self.sessions.retain(|_, session| session.expires_at >= now);
        self.tokens.retain(|_, token| token.expires_at >= now);
        // A concurrent login may insert between the two counts
        before.saturating_sub(self.sessions.len() + self.tokens.len())
    }

    /// Periodically sweeps expired entries until the task is aborted
    pub async fn run_sweeper(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = self.sweep_expired(Utc::now().timestamp());
            if removed > 0 {
                debug!("Swept {} expired auth entries", removed);
            }
        }
    }

    #[cfg(test)]
    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }
}

fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", code, width = OTP_DIGITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, LogStatus};
    use crate::auth::delivery::testing::{RecordingDelivery, StalledDelivery};
    use crate::blockchain::crypto::generate_keypair;

    const NOW: i64 = 1_700_000_000;

    struct Harness {
        gateway: AuthGateway,
        registry: Arc<AccountRegistry>,
        audit: Arc<AuditLog>,
        delivery: Arc<RecordingDelivery>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(AccountRegistry::new());
        let audit = Arc::new(AuditLog::new());
        let delivery = Arc::new(RecordingDelivery::default());
        let gateway = AuthGateway::new(
            &AuthConfig::default(),
            registry.clone(),
            audit.clone(),
            delivery.clone(),
        );

        Harness {
            gateway,
            registry,
            audit,
            delivery,
        }
    }

    fn register(h: &Harness) -> KeyPair {
        let (_, keypair) = h
            .registry
            .register("Ayesha Khan", "ayesha@example.com", "35202-1234567-1")
            .unwrap();
        keypair
    }

    #[tokio::test]
    async fn test_full_login() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();

        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();
        assert_eq!(code.len(), OTP_DIGITS);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let token = h.gateway.verify_otp_at(&wallet, &code, None, NOW + 10).unwrap();
        assert_eq!(token.wallet_id, *keypair.wallet_id());
        assert_eq!(token.role, Role::User);
        assert_eq!(h.gateway.authenticate_at(&token.token, NOW + 20).unwrap(), token);

        let actions: Vec<AuditAction> = h.audit.entries().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::LoginRequested,
                AuditAction::OtpDispatched,
                AuditAction::LoginSucceeded
            ]
        );
    }

    #[tokio::test]
    async fn test_codes_never_reach_the_audit_log() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();
        h.gateway.verify_otp_at(&wallet, &code, None, NOW).unwrap();

        for entry in h.audit.entries() {
            assert!(!entry.details.contains(&code));
            assert!(!entry.details.contains(&keypair.export_secret_hex()));
        }
    }

    #[tokio::test]
    async fn test_expired_code() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();

        let late = NOW + AuthConfig::default().otp_ttl_secs as i64 + 1;
        assert_eq!(
            h.gateway.verify_otp_at(&wallet, &code, None, late),
            Err(AuthError::Expired)
        );
    }

    #[tokio::test]
    async fn test_code_reuse() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();

        assert!(h.gateway.verify_otp_at(&wallet, &code, None, NOW).is_ok());
        assert_eq!(
            h.gateway.verify_otp_at(&wallet, &code, None, NOW),
            Err(AuthError::AlreadyConsumed)
        );

        let last = h.audit.entries().pop().unwrap();
        assert_eq!(last.action, AuditAction::LoginFailed);
        assert_eq!(last.status, LogStatus::Failure);
        assert!(last.details.contains("AlreadyConsumed"));
    }

    #[tokio::test]
    async fn test_wrong_code_and_missing_session() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        assert_eq!(
            h.gateway.verify_otp_at(&wallet, "123456", None, NOW),
            Err(AuthError::SessionNotFound)
        );

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert_eq!(
            h.gateway.verify_otp_at(&wallet, wrong, None, NOW),
            Err(AuthError::CodeMismatch)
        );
        // A single mismatch does not burn the session
        assert!(h.gateway.verify_otp_at(&wallet, &code, None, NOW).is_ok());
    }

    #[tokio::test]
    async fn test_repeated_wrong_codes_burn_the_session() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let limit = AuthConfig::default().max_otp_attempts;
        for _ in 0..limit {
            assert_eq!(
                h.gateway.verify_otp_at(&wallet, wrong, None, NOW),
                Err(AuthError::CodeMismatch)
            );
        }

        // The right code no longer works; a new login is needed
        assert_eq!(
            h.gateway.verify_otp_at(&wallet, &code, None, NOW),
            Err(AuthError::AlreadyConsumed)
        );

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let fresh = h.delivery.last_code(keypair.wallet_id()).unwrap();
        assert!(h.gateway.verify_otp_at(&wallet, &fresh, None, NOW).is_ok());
    }

    #[tokio::test]
    async fn test_generic_response_for_unknown_or_mismatched_wallets() {
        let h = harness();
        let registered = register(&h);
        let stranger = generate_keypair();

        // Unregistered wallet with its own key
        h.gateway
            .begin_login_at(&stranger.wallet_id().to_string(), &stranger.export_secret_hex(), None, NOW)
            .await
            .unwrap();

        // Registered wallet with someone else's key
        h.gateway
            .begin_login_at(
                &registered.wallet_id().to_string(),
                &stranger.export_secret_hex(),
                None,
                NOW,
            )
            .await
            .unwrap();

        assert_eq!(h.delivery.count(), 0);
        assert_eq!(h.gateway.pending_sessions(), 0);

        assert!(matches!(
            h.gateway
                .begin_login_at(&registered.wallet_id().to_string(), "zz", None, NOW)
                .await,
            Err(AuthError::MalformedCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_timeout_still_creates_session() {
        let registry = Arc::new(AccountRegistry::new());
        let audit = Arc::new(AuditLog::new());
        let config = AuthConfig {
            delivery_timeout_secs: 1,
            ..AuthConfig::default()
        };
        let gateway = AuthGateway::new(
            &config,
            registry.clone(),
            audit.clone(),
            Arc::new(StalledDelivery),
        );
        let (_, keypair) = registry.register("Bilal", "bilal@example.com", "42101-7654321-3").unwrap();

        gateway
            .begin_login_at(&keypair.wallet_id().to_string(), &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();

        assert_eq!(gateway.pending_sessions(), 1);
        let last = audit.entries().pop().unwrap();
        assert_eq!(last.action, AuditAction::OtpDeliveryFailed);
    }

    #[tokio::test]
    async fn test_admin_tokens_and_sweep() {
        let h = harness();
        let keypair = register(&h);
        let wallet = keypair.wallet_id().to_string();

        h.gateway
            .begin_login_at(&wallet, &keypair.export_secret_hex(), None, NOW)
            .await
            .unwrap();
        let code = h.delivery.last_code(keypair.wallet_id()).unwrap();
        let token = h.gateway.verify_otp_at(&wallet, &code, None, NOW).unwrap();

        assert_eq!(h.gateway.require_admin_at(&token.token, NOW), Err(AuthError::Forbidden));
        h.registry.promote(keypair.wallet_id()).unwrap();
        assert_eq!(
            h.gateway.require_admin_at(&token.token, NOW),
            Ok(keypair.wallet_id().clone())
        );
        assert_eq!(h.gateway.require_admin_at("nope", NOW), Err(AuthError::InvalidToken));

        let far_future = NOW + 10 * AuthConfig::default().session_ttl_secs as i64;
        assert_eq!(h.gateway.sweep_expired(far_future), 2);
        assert_eq!(
            h.gateway.authenticate_at(&token.token, NOW),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_sweep_races_with_new_logins() {
        let h = harness();
        let gateway = Arc::new(h.gateway);

        let inserter = {
            let gateway = gateway.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let wallet = generate_keypair().wallet_id().clone();
                    gateway.sessions.insert(
                        wallet.clone(),
                        AuthSession {
                            wallet_id: wallet,
                            code: generate_code(),
                            expires_at: NOW + 300,
                            consumed: false,
                            failed_attempts: 0,
                        },
                    );
                }
            })
        };

        // Nothing is expired, so every sweep removes nothing even while the map grows
        let mut removed = 0;
        while !inserter.is_finished() {
            removed += gateway.sweep_expired(NOW);
        }
        inserter.join().unwrap();

        assert_eq!(removed, 0);
        assert_eq!(gateway.pending_sessions(), 500);
    }
}
