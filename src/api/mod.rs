// API module
//
// This module contains the REST boundary of the ledger service

pub mod error;
pub mod handlers;
pub mod routes;
pub mod schema;

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::auth::AuthGateway;
use crate::blockchain::{AccountRegistry, KeyPair, Ledger, Miner, TransactionPool};

pub use routes::configure_routes;

/// Shared handles given to every handler
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub pool: Arc<TransactionPool>,
    pub miner: Arc<Miner>,
    pub registry: Arc<AccountRegistry>,
    pub auth: Arc<AuthGateway>,
    pub audit: Arc<AuditLog>,

    /// Signs admin mint transactions
    pub authority: Arc<KeyPair>,
}
