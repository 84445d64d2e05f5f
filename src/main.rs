use std::time::Duration;

use accountd::{app, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "accountd=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (state, outbox) = AppState::init().await?;
    let app = app::build_app(state);

    app::serve(app).await?;

    // The router (and every outbox handle in it) is gone; flush what is queued.
    match outbox.drain(Duration::from_secs(10)).await {
        Some(delivered) => tracing::info!(delivered, "mail outbox drained"),
        None => tracing::warn!("exiting with undelivered mail"),
    }
    Ok(())
}
