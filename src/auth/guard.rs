use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use time::OffsetDateTime;
use tracing::warn;

use super::claims::SessionClaims;
use super::jwt::TokenService;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::state::AppState;
use crate::users::Role;

/// Caller identity attached to a request after its session token verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Expects exactly `Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MissingToken),
    }
}

/// Expired and forged tokens both come back as `Unauthorized`.
pub fn authenticate(
    tokens: &TokenService,
    headers: &HeaderMap,
    now: OffsetDateTime,
) -> Result<Identity, AuthError> {
    let token = bearer_token(headers)?;
    let claims = tokens.verify::<SessionClaims>(token, now).map_err(|e| {
        warn!(reason = %e, "session token rejected");
        AuthError::Unauthorized
    })?;
    Ok(claims.into())
}

/// Verifies the session token and stores the [`Identity`] in the request
/// extensions for everything downstream.
pub async fn authorize(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = authenticate(&state.tokens, req.headers(), state.clock.now())?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Must run inside [`authorize`]. Role comparison is exact.
pub async fn require_role(required: Role, req: Request, next: Next) -> Result<Response, AuthError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or(AuthError::Unauthorized)?;

    if identity.role != required {
        warn!(user_id = identity.user_id, role = %identity.role, required = %required, "role check failed");
        return Err(AuthError::Forbidden);
    }
    Ok(next.run(req).await)
}
