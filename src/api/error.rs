use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use thiserror::Error;

use crate::auth::AuthError;
use crate::blockchain::account::AccountError;
use crate::blockchain::crypto::CryptoError;
use crate::blockchain::pool::RejectionReason;
use crate::blockchain::transaction::TransactionError;

/// Errors returned to API clients.
///
/// The body is always a single JSON string describing the failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.to_string())
    }
}

impl From<RejectionReason> for ApiError {
    fn from(reason: RejectionReason) -> Self {
        match reason {
            RejectionReason::LedgerUnavailable => ApiError::Unavailable(reason.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::AccountNotFound(_) => ApiError::NotFound("User not found".to_string()),
            AccountError::EmailTaken(_) => ApiError::Conflict("Email already exists".to_string()),
            AccountError::InvalidField { .. } | AccountError::InvalidBeneficiary(_) => {
                ApiError::BadRequest(err.to_string())
            }
            AccountError::StorageError(e) => {
                error!("Account storage failure: {}", e);
                ApiError::Internal("Database error".to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedCredentials(_) => ApiError::BadRequest(err.to_string()),
            AuthError::Forbidden => ApiError::Forbidden("Admin access required".to_string()),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<TransactionError> for ApiError {
    fn from(err: TransactionError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_body_is_a_plain_string() {
        let response = ApiError::from(RejectionReason::InsufficientFunds {
            available: 3,
            required: 5,
        })
        .error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let message: String = serde_json::from_slice(&body).unwrap();
        assert_eq!(message, "Insufficient funds: available 3, required 5");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(RejectionReason::LedgerUnavailable).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(AccountError::EmailTaken("a@b.c".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::from(AuthError::Expired).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(AuthError::Forbidden).status_code(), StatusCode::FORBIDDEN);
    }
}
