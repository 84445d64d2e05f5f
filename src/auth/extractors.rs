use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::guard::{authenticate, Identity};
use super::jwt::TokenService;
use crate::clock::Clock;
use crate::error::AuthError;

/// Identity of the caller. Reuses what [`super::guard::authorize`] attached,
/// otherwise verifies the bearer token itself.
pub struct AuthUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
    Arc<dyn Clock>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(AuthUser(identity.clone()));
        }

        let tokens = <Arc<TokenService> as FromRef<S>>::from_ref(state);
        let clock = <Arc<dyn Clock> as FromRef<S>>::from_ref(state);
        let identity = authenticate(&tokens, &parts.headers, clock.now())?;
        parts.extensions.insert(identity.clone());
        Ok(AuthUser(identity))
    }
}
