use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::service::{ProfileUpdate, Registration};
use crate::error::AppError;
use crate::users::{Role, User};

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn checked_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim();
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    Ok(email.to_string())
}

fn checked_username(raw: &str) -> Result<String, AppError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".into()));
    }
    Ok(username.to_string())
}

fn checked_password(password: String) -> Result<String, AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(password)
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, AppError> {
        Ok(Registration {
            username: checked_username(&self.username)?,
            email: checked_email(&self.email)?,
            password: checked_password(self.password)?,
        })
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(self) -> Result<(String, String), AppError> {
        if self.password.is_empty() {
            return Err(AppError::Validation("Password is required".into()));
        }
        Ok((checked_email(&self.email)?, self.password))
    }
}

/// Request body for profile update. An absent or empty password keeps the current one.
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl UpdateRequest {
    pub fn validate(self) -> Result<ProfileUpdate, AppError> {
        let password = match self.password.filter(|p| !p.is_empty()) {
            Some(p) => Some(checked_password(p)?),
            None => None,
        };
        Ok(ProfileUpdate {
            username: checked_username(&self.username)?,
            email: checked_email(&self.email)?,
            password,
        })
    }
}

/// Body for both verification resend and password reset requests.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

impl EmailRequest {
    pub fn validate(self) -> Result<String, AppError> {
        checked_email(&self.email)
    }
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    #[serde(rename = "newPassword", alias = "new_password")]
    pub new_password: String,
}

impl PasswordResetConfirmRequest {
    pub fn validate(self) -> Result<(String, String), AppError> {
        if self.token.trim().is_empty() {
            return Err(AppError::Validation("Missing reset token".into()));
        }
        Ok((self.token.trim().to_string(), checked_password(self.new_password)?))
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            email: user.email,
            role: user.role,
        }
    }
}
