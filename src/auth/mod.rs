//! Credential hashing, purpose-bound tokens and the bearer-token guard.

pub mod claims;
pub mod extractors;
pub mod guard;
pub mod jwt;
pub mod password;

pub use claims::{EmailVerificationClaims, PasswordResetClaims, SessionClaims, TokenPurpose};
pub use extractors::AuthUser;
pub use guard::Identity;
pub use jwt::{TokenError, TokenService};
pub use password::{CredentialHasher, HashError};
