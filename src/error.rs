use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::jwt::TokenError;
use crate::auth::password::HashError;
use crate::mail::MailError;
use crate::users::repo::{StoreError, EMAIL_UNIQUE_CONSTRAINT, USERNAME_UNIQUE_CONSTRAINT};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing or malformed authorization header")]
    MissingToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User email not verified")]
    EmailNotVerified,

    #[error("Invalid or expired token")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token expired")]
    TokenExpired,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Email already in use")]
    EmailTaken,

    #[error("Username already in use")]
    UsernameTaken,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("hashing error: {0}")]
    Hashing(#[from] HashError),

    #[error("persistence error: {0}")]
    Persistence(StoreError),

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::UniqueViolation { constraint } if constraint == EMAIL_UNIQUE_CONSTRAINT => {
                AppError::EmailTaken
            }
            StoreError::UniqueViolation { constraint }
                if constraint == USERNAME_UNIQUE_CONSTRAINT =>
            {
                AppError::UsernameTaken
            }
            _ => AppError::Persistence(err),
        }
    }
}

/// Pass-through for the single-purpose token confirmations.
impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => AppError::Auth(AuthError::TokenInvalid),
            TokenError::Expired => AppError::Auth(AuthError::TokenExpired),
            TokenError::Signing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::EmailTaken | AppError::UsernameTaken => {
                StatusCode::BAD_REQUEST
            }
            AppError::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Hashing(_)
            | AppError::Persistence(_)
            | AppError::Mail(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::Auth(self).into_response()
    }
}
