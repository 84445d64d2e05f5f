pub mod accounts;
pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod mail;
pub mod state;
pub mod users;
