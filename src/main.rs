use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{error, info, warn};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod audit;
mod auth;
mod blockchain;
mod config;

use api::AppState;
use audit::AuditLog;
use auth::{AuthGateway, ConsoleDelivery, OtpDelivery};
use blockchain::storage::LedgerStorage;
use blockchain::{AccountRegistry, KeyPair, Ledger, Miner, TransactionPool, WalletId};
use config::{Config, DeliveryKind};

const SWEEP_PERIOD: Duration = Duration::from_secs(60);

// Open the on-disk database, or run without persistence if that fails
fn open_storage(config: &Config) -> Option<Arc<LedgerStorage>> {
    if config.storage.in_memory {
        info!("Storage disabled, running in memory");
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(&config.storage.path) {
        warn!("Failed to create data directory {}: {}", config.storage.path, e);
    }

    match LedgerStorage::open(&config.storage.path) {
        Ok(storage) => {
            info!("Opened storage at {}", config.storage.path);
            Some(Arc::new(storage))
        }
        Err(e) => {
            warn!("Failed to open storage at {}: {}", config.storage.path, e);
            warn!("Falling back to in-memory ledger; nothing will be persisted");
            None
        }
    }
}

// Load the node authority key, generating and persisting it on first start
fn load_authority(storage: Option<&Arc<LedgerStorage>>) -> anyhow::Result<KeyPair> {
    let Some(storage) = storage else {
        warn!("No storage; using an ephemeral authority key");
        return Ok(KeyPair::generate());
    };

    match storage.load_authority_key()? {
        Some(secret) => {
            let authority = KeyPair::from_secret_key(&secret).context("stored authority key is corrupt")?;
            info!("Loaded node authority {}", authority.public_key_hex());
            Ok(authority)
        }
        None => {
            let authority = KeyPair::generate();
            storage.save_authority_key(&authority.export_secret_key())?;
            info!("Generated node authority {}", authority.public_key_hex());
            Ok(authority)
        }
    }
}

fn promote_admins(config: &Config, registry: &AccountRegistry) {
    for wallet in &config.auth.admin_wallets {
        let wallet_id = match WalletId::from_str(wallet) {
            Ok(wallet_id) => wallet_id,
            Err(e) => {
                warn!("Ignoring admin wallet {}: {}", wallet, e);
                continue;
            }
        };

        if !registry.exists(&wallet_id) {
            warn!("Admin wallet {} is not registered yet", wallet_id);
            continue;
        }

        match registry.promote(&wallet_id) {
            Ok(_) => info!("Wallet {} has Admin role", wallet_id),
            Err(e) => warn!("Failed to promote {}: {}", wallet_id, e),
        }
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_token",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::register,
        api::handlers::generate_wallet,
        api::handlers::login,
        api::handlers::verify_otp,
        api::handlers::get_balance,
        api::handlers::get_history,
        api::handlers::send,
        api::handlers::get_blocks,
        api::handlers::get_pending,
        api::handlers::validate_chain,
        api::handlers::mine,
        api::handlers::get_profile,
        api::handlers::get_beneficiaries,
        api::handlers::add_beneficiary,
        api::handlers::remove_beneficiary,
        api::handlers::get_stats,
        api::handlers::get_users,
        api::handlers::promote,
        api::handlers::mint,
        api::handlers::get_logs
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionKind,
            blockchain::Role,
            audit::LogEntry,
            audit::AuditAction,
            audit::LogStatus,
            api::schema::RegisterRequest,
            api::schema::WalletResponse,
            api::schema::LoginRequest,
            api::schema::OtpRequest,
            api::schema::MessageResponse,
            api::schema::LoginResponse,
            api::schema::BalanceResponse,
            api::schema::SendRequest,
            api::schema::SendResponse,
            api::schema::ValidationResponse,
            api::schema::ProfileResponse,
            api::schema::BeneficiaryRequest,
            api::schema::StatsResponse,
            api::schema::AdminUserResponse,
            api::schema::PromoteRequest,
            api::schema::MintRequest
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration and two-step login"),
        (name = "wallet", description = "Balances, history and transfers"),
        (name = "blockchain", description = "Blocks, pending transactions and mining"),
        (name = "user", description = "Profiles and beneficiaries"),
        (name = "admin", description = "Admin only endpoints"),
        (name = "logs", description = "Audit log")
    ),
    info(
        title = "Wallet Ledger API",
        version = "0.1.0",
        description = "A single-node wallet ledger with signed transactions and proof-of-work blocks",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(config.logging.filter.as_str()));

    let storage = open_storage(&config);
    let authority = Arc::new(load_authority(storage.as_ref())?);

    let (ledger, registry, audit) = match &storage {
        Some(storage) => (
            Ledger::open(storage.clone(), &config.ledger, *authority.public_key())?,
            AccountRegistry::with_storage(storage.clone())?,
            AuditLog::with_storage(storage.clone())?,
        ),
        None => (
            Ledger::new(&config.ledger, *authority.public_key()),
            AccountRegistry::new(),
            AuditLog::new(),
        ),
    };
    let ledger = Arc::new(ledger);
    let registry = Arc::new(registry);
    let audit = Arc::new(audit);

    if ledger.is_compromised() {
        error!("Ledger failed verification; mutating requests will be refused");
    }

    promote_admins(&config, &registry);

    let pool = Arc::new(TransactionPool::new(ledger.clone(), config.miner.trigger_on_submit));
    let miner = Arc::new(Miner::new(
        ledger.clone(),
        pool.clone(),
        audit.clone(),
        authority.clone(),
        config.miner.clone(),
    )?);

    let delivery: Arc<dyn OtpDelivery> = match config.auth.delivery {
        DeliveryKind::Console => Arc::new(ConsoleDelivery),
    };
    let auth = Arc::new(AuthGateway::new(&config.auth, registry.clone(), audit.clone(), delivery));

    if config.miner.enabled {
        tokio::spawn(miner.clone().run());
    } else {
        info!("Background miner disabled");
    }
    tokio::spawn(auth.clone().run_sweeper(SWEEP_PERIOD));

    let state = web::Data::new(AppState {
        ledger,
        pool,
        miner: miner.clone(),
        registry,
        auth,
        audit,
        authority,
    });

    let openapi = ApiDoc::openapi();
    let (host, port) = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("failed to bind {}:{}", host, port))?
    .run()
    .await?;

    info!("Shutting down");
    miner.shutdown();

    if let Some(storage) = storage {
        storage.flush()?;
    }

    Ok(())
}
