use anyhow::{anyhow, bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub session_ttl_minutes: i64,
    pub email_verification_ttl_minutes: i64,
    pub password_reset_ttl_minutes: i64,
}

/// Argon2 cost parameters. The defaults match `argon2::Params::DEFAULT`.
#[derive(Debug, Clone, Deserialize)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from: String,
    pub public_base_url: String,
    pub relay_url: Option<String>,
    pub queue_capacity: usize,
    pub relay_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub hasher: HasherConfig,
    pub mail: MailConfig,
}

/// Session lifetime must stay between one and twelve hours.
pub const SESSION_TTL_RANGE_MINUTES: std::ops::RangeInclusive<i64> = 60..=720;

/// Unset or empty falls back to `default`; a value that does not parse is an error.
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|e| anyhow!("{key}={v:?} is not valid: {e}")),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_or(key, std::env::var(key).ok(), default)
}

fn read_secret() -> anyhow::Result<String> {
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        return Ok(secret);
    }
    let path = std::env::var("JWT_SECRET_FILE")
        .context("either JWT_SECRET or JWT_SECRET_FILE must be set")?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read JWT secret file {path}"))?;
    Ok(raw.trim().to_string())
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.secret.is_empty() {
            bail!("JWT secret must not be empty");
        }
        if !SESSION_TTL_RANGE_MINUTES.contains(&self.session_ttl_minutes) {
            bail!(
                "SESSION_TTL_MINUTES must be within {}..={}, got {}",
                SESSION_TTL_RANGE_MINUTES.start(),
                SESSION_TTL_RANGE_MINUTES.end(),
                self.session_ttl_minutes
            );
        }
        if self.email_verification_ttl_minutes <= 0 || self.password_reset_ttl_minutes <= 0 {
            bail!("single-purpose token lifetimes must be positive");
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: read_secret()?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "accountd".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "accountd-users".into()),
            session_ttl_minutes: env_or("SESSION_TTL_MINUTES", 12 * 60)?,
            email_verification_ttl_minutes: env_or("EMAIL_VERIFICATION_TTL_MINUTES", 5)?,
            password_reset_ttl_minutes: env_or("PASSWORD_RESET_TTL_MINUTES", 5)?,
        };
        jwt.validate()?;

        let defaults = HasherConfig::default();
        let hasher = HasherConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: env_or("ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: env_or("ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        let mail = MailConfig {
            from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@accountd.local".into()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            relay_url: std::env::var("MAIL_RELAY_URL").ok().filter(|v| !v.is_empty()),
            queue_capacity: env_or("MAIL_QUEUE_CAPACITY", 256)?,
            relay_timeout_secs: env_or("MAIL_RELAY_TIMEOUT_SECS", 10)?,
        };

        Ok(Self {
            database_url,
            jwt,
            hasher,
            mail,
        })
    }
}
