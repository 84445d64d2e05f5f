//! Account lifecycle: registration, login, profile, email verification and
//! password reset, plus the HTTP routes that expose them.

mod dto;
pub mod handlers;
mod service;

use axum::{
    extract::Request,
    middleware::{self, Next},
    routing::{delete, get, post, put},
    Router,
};

use crate::auth::guard::{authorize, require_role};
use crate::state::AppState;
use crate::users::Role;

pub use service::{AccountService, ProfileUpdate, Registration, VerificationOutcome};

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/register", post(handlers::register))
        .route("/api/login", post(handlers::login))
        .route(
            "/user/password-reset/request",
            post(handlers::request_password_reset),
        )
        .route(
            "/user/password-reset/confirm",
            post(handlers::confirm_password_reset),
        )
        .route(
            "/user/email/verify/request",
            post(handlers::request_email_verification),
        )
        .route("/user/email/verify", get(handlers::confirm_email_verification))
}

fn session_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/user/profile", get(handlers::profile))
        .route("/user/update", put(handlers::update_profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), authorize))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/user/admin/delete-user/:id", delete(handlers::delete_user))
        // layers run outside-in: authorize first, then the role check
        .route_layer(middleware::from_fn(|req: Request, next: Next| {
            require_role(Role::Admin, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(state.clone(), authorize))
}

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(public_routes())
        .merge(session_routes(state))
        .merge(admin_routes(state))
}
