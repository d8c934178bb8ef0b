use actix_web::{error, web};

use super::error::ApiError;
use super::handlers;

/// Configures the API routes
///
/// Malformed JSON bodies and query strings are answered with the same
/// string error body as every other failure.
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let message = match &err {
            error::JsonPayloadError::Deserialize(e) => format!("Invalid request body: {}", e),
            other => other.to_string(),
        };
        ApiError::BadRequest(message).into()
    });
    let query_config = web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into());

    cfg.service(
        web::scope("/api")
            .app_data(json_config)
            .app_data(query_config)
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(handlers::register))
                    .route("/generate", web::post().to(handlers::generate_wallet))
                    .route("/login", web::post().to(handlers::login))
                    .route("/verify-otp", web::post().to(handlers::verify_otp)),
            )
            .service(
                web::scope("/wallet")
                    .route("/send", web::post().to(handlers::send))
                    .route("/{id}/balance", web::get().to(handlers::get_balance))
                    .route("/{id}/history", web::get().to(handlers::get_history)),
            )
            .service(
                web::scope("/blockchain")
                    .route("/blocks", web::get().to(handlers::get_blocks))
                    .route("/pending", web::get().to(handlers::get_pending))
                    .route("/validate", web::get().to(handlers::validate_chain))
                    .route("/mine", web::post().to(handlers::mine)),
            )
            .service(
                web::scope("/user")
                    .route("/beneficiary", web::post().to(handlers::add_beneficiary))
                    .route("/beneficiary", web::delete().to(handlers::remove_beneficiary))
                    .route("/{id}/profile", web::get().to(handlers::get_profile))
                    .route("/{id}/beneficiaries", web::get().to(handlers::get_beneficiaries)),
            )
            .service(
                web::scope("/admin")
                    .route("/stats", web::get().to(handlers::get_stats))
                    .route("/users", web::get().to(handlers::get_users))
                    .route("/promote", web::post().to(handlers::promote))
                    .route("/mint", web::post().to(handlers::mint)),
            )
            .route("/logs", web::get().to(handlers::get_logs)),
    );
}
