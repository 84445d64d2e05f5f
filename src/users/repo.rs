use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;

use super::model::{NewUser, Role, User, UserField};

pub const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";
pub const USERNAME_UNIQUE_CONSTRAINT: &str = "users_username_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("corrupt user row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
        }
        StoreError::Database(err)
    }
}

/// Persistence operations the account lifecycle depends on.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Fails with `UniqueViolation` when email or username is already taken.
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Writes username, email, password hash, role and verified flag back by id.
    /// Returns `false` when the row is gone.
    async fn save(&self, user: &User) -> Result<bool, StoreError>;

    /// Returns `false` when no row has that email.
    async fn update_field(&self, email: &str, field: UserField) -> Result<bool, StoreError>;

    /// Returns `false` when no row has that id.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    verified: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(StoreError::Corrupt)?;
        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role,
            verified: row.verified,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, verified, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, verified, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, role, verified, created_at
            "#,
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.role.as_str())
        .fetch_one(&self.db)
        .await?;
        User::try_from(row)
    }

    async fn save(&self, user: &User) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, role = $5, verified = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.verified)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_field(&self, email: &str, field: UserField) -> Result<bool, StoreError> {
        let result = match field {
            UserField::PasswordHash(hash) => {
                sqlx::query("UPDATE users SET password_hash = $2 WHERE email = $1")
                    .bind(email)
                    .bind(hash)
                    .execute(&self.db)
                    .await?
            }
            UserField::Verified(verified) => {
                sqlx::query("UPDATE users SET verified = $2 WHERE email = $1")
                    .bind(email)
                    .bind(verified)
                    .execute(&self.db)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
