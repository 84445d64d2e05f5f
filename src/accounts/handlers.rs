use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use tracing::{info, instrument};

use super::dto::{
    EmailRequest, LoginRequest, MessageResponse, PasswordResetConfirmRequest, ProfileResponse,
    RegisterRequest, TokenResponse, UpdateRequest, VerifyEmailQuery,
};
use super::service::VerificationOutcome;
use crate::{auth::AuthUser, error::AppError, state::AppState};

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let Json(payload) = payload?;
    let registration = payload.validate()?;
    state.accounts.register(registration).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "User registered successfully. Please verify your email.",
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(payload) = payload?;
    let (email, password) = payload.validate()?;
    let token = state.accounts.login(&email, &password).await?;
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip(state, user), fields(user_id = user.user_id))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state.accounts.profile(&user).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, user, payload), fields(user_id = user.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    let update = payload.validate()?;
    state.accounts.update_profile(&user, update).await?;
    Ok(Json(MessageResponse::new("User updated successfully")))
}

#[instrument(skip(state, admin), fields(admin_id = admin.user_id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Path(id) = id?;
    state.accounts.delete_user(id).await?;
    info!(target_id = id, "admin removed user");
    Ok(Json(MessageResponse::new("User deleted successfully")))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    let email = payload.validate()?;
    state.accounts.request_password_reset(&email).await?;
    Ok(Json(MessageResponse::new("Password reset email sent")))
}

#[instrument(skip(state, payload))]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    payload: Result<Json<PasswordResetConfirmRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    let (token, new_password) = payload.validate()?;
    state
        .accounts
        .confirm_password_reset(&token, new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}

#[instrument(skip(state, payload))]
pub async fn request_email_verification(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    let email = payload.validate()?;
    state.accounts.request_email_verification(&email).await?;
    Ok(Json(MessageResponse::new("Verification email sent")))
}

#[instrument(skip(state, query))]
pub async fn confirm_email_verification(
    State(state): State<AppState>,
    query: Result<Query<VerifyEmailQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Query(query) = query?;
    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Missing verification token".into()))?;

    let message = match state.accounts.confirm_email_verification(token.trim()).await? {
        VerificationOutcome::Verified => "Email verified successfully",
        VerificationOutcome::AlreadyVerified => "Email already verified",
    };
    Ok(Json(MessageResponse::new(message)))
}
