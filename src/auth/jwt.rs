use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::{Envelope, PurposeClaims, TokenPurpose};
use crate::config::JwtConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Issues and verifies HS256 tokens for every [`TokenPurpose`].
///
/// The secret is injected once at construction. Verification is a pure
/// function of the token, the secret and the supplied `now`; the token is
/// still valid at exactly `exp` and expired one second later.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    session_ttl: Duration,
    email_verification_ttl: Duration,
    password_reset_ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is compared against the caller's clock in `verify`
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));
        validation.set_audience(std::slice::from_ref(&cfg.audience));

        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: Duration::minutes(cfg.session_ttl_minutes),
            email_verification_ttl: Duration::minutes(cfg.email_verification_ttl_minutes),
            password_reset_ttl: Duration::minutes(cfg.password_reset_ttl_minutes),
        }
    }

    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::Session => self.session_ttl,
            TokenPurpose::EmailVerify => self.email_verification_ttl,
            TokenPurpose::PasswordReset => self.password_reset_ttl,
        }
    }

    pub fn issue<C: PurposeClaims>(
        &self,
        claims: &C,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let exp = now + self.ttl(C::PURPOSE);
        let envelope = Envelope {
            claims,
            purpose: C::PURPOSE,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &envelope, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(purpose = ?C::PURPOSE, exp = envelope.exp, "jwt signed");
        Ok(token)
    }

    pub fn verify<C: PurposeClaims>(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<C, TokenError> {
        let data = decode::<Envelope<C>>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, purpose = ?C::PURPOSE, "jwt rejected");
            TokenError::Invalid
        })?;
        let envelope = data.claims;

        if envelope.purpose != C::PURPOSE {
            debug!(expected = ?C::PURPOSE, actual = ?envelope.purpose, "jwt purpose mismatch");
            return Err(TokenError::Invalid);
        }
        if now.unix_timestamp() > envelope.exp {
            return Err(TokenError::Expired);
        }
        debug!(purpose = ?C::PURPOSE, "jwt verified");
        Ok(envelope.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_jwt_config(secret: &str) -> JwtConfig {
    JwtConfig {
        secret: secret.into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        session_ttl_minutes: 12 * 60,
        email_verification_ttl_minutes: 5,
        password_reset_ttl_minutes: 5,
    }
}
