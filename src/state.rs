use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRef;
use tracing::info;

use crate::accounts::AccountService;
use crate::auth::{CredentialHasher, TokenService};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::mail::{HttpRelayMailer, LogMailer, MailOutbox, MailSender, MailTemplates, OutboxWorker};
use crate::users::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub clock: Arc<dyn Clock>,
    pub accounts: AccountService,
}

impl AppState {
    /// Connects to Postgres, runs migrations and starts the mail outbox.
    pub async fn init() -> anyhow::Result<(Self, OutboxWorker)> {
        let config = AppConfig::from_env()?;

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connecting to postgres")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("running migrations")?;

        let mailer: Arc<dyn MailSender> = match &config.mail.relay_url {
            Some(url) => {
                info!(relay = %url, "mail goes through http relay");
                Arc::new(HttpRelayMailer::new(
                    url.clone(),
                    config.mail.from.clone(),
                    Duration::from_secs(config.mail.relay_timeout_secs),
                )?)
            }
            None => {
                info!("MAIL_RELAY_URL unset; mail is written to the log");
                Arc::new(LogMailer::new(config.mail.from.clone()))
            }
        };

        Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db)),
            mailer,
            Arc::new(SystemClock),
        )
    }

    /// Wires the services from explicit collaborators. Must run inside a tokio runtime.
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn MailSender>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<(Self, OutboxWorker)> {
        config.jwt.validate()?;
        let hasher = CredentialHasher::new(&config.hasher).context("argon2 parameters")?;
        let tokens = Arc::new(TokenService::new(&config.jwt));
        let (outbox, worker) = MailOutbox::start(mailer, config.mail.queue_capacity);
        let templates = MailTemplates::new(&config.mail.public_base_url);

        let accounts = AccountService::new(
            store,
            hasher,
            tokens.clone(),
            outbox,
            templates,
            clock.clone(),
        );

        let state = Self {
            tokens,
            clock,
            accounts,
        };
        Ok((state, worker))
    }
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl FromRef<AppState> for Arc<dyn Clock> {
    fn from_ref(state: &AppState) -> Self {
        state.clock.clone()
    }
}
