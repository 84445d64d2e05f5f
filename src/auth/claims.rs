use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::users::Role;

/// Which operation a token may authorize. Embedded in every token and
/// checked on verification, so tokens are not interchangeable across purposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Session,
    EmailVerify,
    PasswordReset,
}

/// Claim set bound to exactly one purpose.
pub trait PurposeClaims: Serialize + DeserializeOwned {
    const PURPOSE: TokenPurpose;
}

/// Identity carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

impl PurposeClaims for SessionClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::Session;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailVerificationClaims {
    pub email: String,
}

impl PurposeClaims for EmailVerificationClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::EmailVerify;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetClaims {
    pub email: String,
}

impl PurposeClaims for PasswordResetClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::PasswordReset;
}

/// JWT payload: purpose specific claims plus the registered ones.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope<C> {
    #[serde(flatten)]
    pub claims: C,
    pub purpose: TokenPurpose,
    pub iat: i64,    // issued at (unix timestamp)
    pub exp: i64,    // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
}
