use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::auth::{
    guard::Identity, CredentialHasher, EmailVerificationClaims, PasswordResetClaims, SessionClaims,
    TokenPurpose, TokenService,
};
use crate::clock::Clock;
use crate::error::{AppError, AuthError};
use crate::mail::{MailOutbox, MailTemplates, OutgoingMail};
use crate::users::{NewUser, Role, User, UserField, UserStore};

/// Validated registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Validated profile update. `password: None` keeps the current hash.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub username: String,
    pub email: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
}

/// Registration, login, profile management, email verification and password reset.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    tokens: Arc<TokenService>,
    outbox: MailOutbox,
    templates: MailTemplates,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: CredentialHasher,
        tokens: Arc<TokenService>,
        outbox: MailOutbox,
        templates: MailTemplates,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            outbox,
            templates,
            clock,
        }
    }

    /// Creates an unverified user and queues a verification email.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: Registration) -> Result<User, AppError> {
        // Fast path only; the unique constraint decides under concurrency.
        if self.store.find_by_email(&input.email).await?.is_some() {
            warn!("email already registered");
            return Err(AppError::EmailTaken);
        }

        let password_hash = self.hasher.hash(input.password).await?;
        let user = self
            .store
            .create(NewUser {
                username: input.username,
                email: input.email,
                password_hash,
                role: Role::User,
            })
            .await?;

        info!(user_id = user.id, "user registered");
        self.send_verification(&user.email);
        Ok(user)
    }

    /// Returns a session token. Unverified accounts are refused and sent a
    /// fresh verification email.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<String, AppError> {
        let Some(user) = self.store.find_by_email(email).await? else {
            warn!("login unknown email");
            return Err(AuthError::InvalidCredentials.into());
        };

        if !user.verified {
            warn!(user_id = user.id, "login before email verification");
            self.send_verification(&user.email);
            return Err(AuthError::EmailNotVerified.into());
        }

        let ok = self
            .hasher
            .verify(user.password_hash.clone(), password.to_string())
            .await?;
        if !ok {
            warn!(user_id = user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.tokens.issue(
            &SessionClaims {
                user_id: user.id,
                email: user.email.clone(),
                role: user.role,
            },
            self.clock.now(),
        )?;
        info!(user_id = user.id, "user logged in");
        Ok(token)
    }

    #[instrument(skip(self), fields(user_id = identity.user_id))]
    pub async fn profile(&self, identity: &Identity) -> Result<User, AppError> {
        self.store
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AppError::NotFound("User"))
    }

    #[instrument(skip(self, update), fields(user_id = identity.user_id))]
    pub async fn update_profile(
        &self,
        identity: &Identity,
        update: ProfileUpdate,
    ) -> Result<User, AppError> {
        let mut user = self
            .store
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AppError::NotFound("User"))?;

        if let Some(existing) = self.store.find_by_email(&update.email).await? {
            if existing.id != user.id {
                warn!(other_id = existing.id, "email belongs to another user");
                return Err(AppError::EmailTaken);
            }
        }

        user.username = update.username;
        user.email = update.email;
        if let Some(password) = update.password {
            user.password_hash = self.hasher.hash(password).await?;
        }

        if !self.store.save(&user).await? {
            warn!("user vanished before profile update was written");
            return Err(AppError::NotFound("User"));
        }
        info!("profile updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: i64) -> Result<(), AppError> {
        let user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(AppError::NotFound("User"))?;

        if !self.store.delete(user.id).await? {
            return Err(AppError::NotFound("User"));
        }
        info!(user_id = id, "user deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn request_email_verification(&self, email: &str) -> Result<(), AppError> {
        let user = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        self.send_verification(&user.email);
        Ok(())
    }

    /// Idempotent: a second confirmation of a verified account succeeds without writing.
    #[instrument(skip(self, token))]
    pub async fn confirm_email_verification(
        &self,
        token: &str,
    ) -> Result<VerificationOutcome, AppError> {
        let claims = self
            .tokens
            .verify::<EmailVerificationClaims>(token, self.clock.now())?;

        let user = self
            .store
            .find_by_email(&claims.email)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        if user.verified {
            return Ok(VerificationOutcome::AlreadyVerified);
        }

        if !self
            .store
            .update_field(&claims.email, UserField::Verified(true))
            .await?
        {
            return Err(AppError::NotFound("User"));
        }
        info!(user_id = user.id, "email verified");
        Ok(VerificationOutcome::Verified)
    }

    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AppError> {
        let user = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AppError::NotFound("User"))?;

        let token = self.tokens.issue(
            &PasswordResetClaims {
                email: user.email.clone(),
            },
            self.clock.now(),
        )?;
        let ttl = self.tokens.ttl(TokenPurpose::PasswordReset);
        self.dispatch(self.templates.password_reset(&user.email, &token, ttl));
        Ok(())
    }

    /// Replaces the hash of the account named in the reset token.
    #[instrument(skip(self, token, new_password))]
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: String,
    ) -> Result<(), AppError> {
        let claims = self
            .tokens
            .verify::<PasswordResetClaims>(token, self.clock.now())?;

        let hash = self.hasher.hash(new_password).await?;
        if !self
            .store
            .update_field(&claims.email, UserField::PasswordHash(hash))
            .await?
        {
            return Err(AppError::NotFound("User"));
        }
        info!(email = %claims.email, "password reset");
        Ok(())
    }

    /// Best effort: failures are logged and never reach the caller.
    fn send_verification(&self, email: &str) {
        let ttl = self.tokens.ttl(TokenPurpose::EmailVerify);
        match self.tokens.issue(
            &EmailVerificationClaims {
                email: email.to_string(),
            },
            self.clock.now(),
        ) {
            Ok(token) => self.dispatch(self.templates.email_verification(email, &token, ttl)),
            Err(e) => error!(error = %e, to = %email, "could not issue verification token"),
        }
    }

    fn dispatch(&self, mail: OutgoingMail) {
        let to = mail.to.clone();
        if let Err(e) = self.outbox.enqueue(mail) {
            error!(error = %e, to = %to, "could not queue mail");
        } else {
            info!(to = %to, "mail queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_jwt_config;
    use crate::auth::password::test_hasher;
    use crate::clock::FixedClock;
    use crate::mail::{MailError, MailSender, OutboxWorker};
    use crate::users::{InMemoryUserStore, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::{macros::datetime, Duration};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl MailSender for Recording {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    struct Harness {
        svc: AccountService,
        store: Arc<InMemoryUserStore>,
        tokens: Arc<TokenService>,
        clock: Arc<FixedClock>,
        mailer: Arc<Recording>,
        worker: OutboxWorker,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryUserStore::new());
            let tokens = Arc::new(TokenService::new(&test_jwt_config("svc-secret")));
            let clock = Arc::new(FixedClock::new(datetime!(2026-05-01 09:00 UTC)));
            let mailer = Arc::new(Recording::default());
            let (outbox, worker) = MailOutbox::start(mailer.clone(), 16);
            let svc = AccountService::new(
                store.clone(),
                test_hasher(),
                tokens.clone(),
                outbox,
                MailTemplates::new("http://localhost:8080"),
                clock.clone(),
            );
            Self {
                svc,
                store,
                tokens,
                clock,
                mailer,
                worker,
            }
        }

        fn verify_token(&self, email: &str) -> String {
            self.tokens
                .issue(&EmailVerificationClaims { email: email.into() }, self.clock.now())
                .unwrap()
        }

        fn reset_token(&self, email: &str) -> String {
            self.tokens
                .issue(&PasswordResetClaims { email: email.into() }, self.clock.now())
                .unwrap()
        }

        async fn sent_mail(self) -> Vec<OutgoingMail> {
            let Harness { svc, mailer, worker, .. } = self;
            drop(svc);
            worker.drain(std::time::Duration::from_secs(5)).await;
            let sent = mailer.sent.lock().unwrap().clone();
            sent
        }
    }

    /// Service over arbitrary collaborators; the returned outbox shares the service's queue.
    fn service_over(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn MailSender>,
        capacity: usize,
    ) -> (AccountService, MailOutbox, OutboxWorker) {
        let tokens = Arc::new(TokenService::new(&test_jwt_config("svc-secret")));
        let (outbox, worker) = MailOutbox::start(mailer, capacity);
        let svc = AccountService::new(
            store,
            test_hasher(),
            tokens,
            outbox.clone(),
            MailTemplates::new("http://localhost:8080"),
            Arc::new(FixedClock::new(datetime!(2026-05-01 09:00 UTC))),
        );
        (svc, outbox, worker)
    }

    struct FailingMailer;

    #[async_trait]
    impl MailSender for FailingMailer {
        async fn send(&self, _mail: &OutgoingMail) -> Result<(), MailError> {
            Err(MailError::Transport("connection refused".into()))
        }
    }

    /// Takes the first message and never finishes sending it.
    #[derive(Default)]
    struct StalledMailer {
        started: Notify,
    }

    #[async_trait]
    impl MailSender for StalledMailer {
        async fn send(&self, _mail: &OutgoingMail) -> Result<(), MailError> {
            self.started.notify_one();
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Deletes the armed user id the next time an email is looked up.
    #[derive(Default)]
    struct VanishingStore {
        inner: InMemoryUserStore,
        vanish_on_lookup: Mutex<Option<i64>>,
    }

    #[async_trait]
    impl UserStore for VanishingStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            let armed = self.vanish_on_lookup.lock().unwrap().take();
            if let Some(id) = armed {
                self.inner.delete(id).await?;
            }
            self.inner.find_by_email(email).await
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
            self.inner.create(new_user).await
        }

        async fn save(&self, user: &User) -> Result<bool, StoreError> {
            self.inner.save(user).await
        }

        async fn update_field(&self, email: &str, field: UserField) -> Result<bool, StoreError> {
            self.inner.update_field(email, field).await
        }

        async fn delete(&self, id: i64) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }
    }

    fn filler() -> OutgoingMail {
        OutgoingMail {
            to: "queued@x.com".into(),
            subject: "s".into(),
            body: "b".into(),
        }
    }

    fn alice() -> Registration {
        Registration {
            username: "alice".into(),
            email: "alice@x.com".into(),
            password: "secret1".into(),
        }
    }

    fn identity_of(user: &User) -> Identity {
        Identity {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }

    #[tokio::test]
    async fn register_stores_hashed_unverified_user_and_queues_mail() {
        let h = Harness::new();
        let user = h.svc.register(alice()).await.unwrap();
        assert!(!user.verified);
        assert_eq!(user.role, Role::User);
        assert_ne!(user.password_hash, "secret1");
        assert!(user.password_hash.starts_with("$argon2id$"));

        let sent = h.sent_mail().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@x.com");
        assert!(sent[0].body.contains("/user/email/verify?token="));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_and_username() {
        let h = Harness::new();
        h.svc.register(alice()).await.unwrap();

        let same_email = Registration {
            username: "alice2".into(),
            ..alice()
        };
        assert!(matches!(h.svc.register(same_email).await, Err(AppError::EmailTaken)));

        let same_name = Registration {
            email: "other@x.com".into(),
            ..alice()
        };
        assert!(matches!(h.svc.register(same_name).await, Err(AppError::UsernameTaken)));
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn login_before_verification_is_not_verified_and_resends() {
        let h = Harness::new();
        h.svc.register(alice()).await.unwrap();
        let err = h.svc.login("alice@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::EmailNotVerified)));

        let sent = h.sent_mail().await;
        assert_eq!(sent.len(), 2, "registration mail plus resend");
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let h = Harness::new();
        h.svc.register(alice()).await.unwrap();
        h.svc
            .confirm_email_verification(&h.verify_token("alice@x.com"))
            .await
            .unwrap();

        let unknown = h.svc.login("nobody@x.com", "secret1").await.unwrap_err();
        let wrong = h.svc.login("alice@x.com", "wrong-pass").await.unwrap_err();
        assert!(matches!(unknown, AppError::Auth(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, AppError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn verified_login_issues_session_for_the_user() {
        let h = Harness::new();
        let user = h.svc.register(alice()).await.unwrap();
        h.svc
            .confirm_email_verification(&h.verify_token("alice@x.com"))
            .await
            .unwrap();

        let token = h.svc.login("alice@x.com", "secret1").await.unwrap();
        let claims = h.tokens.verify::<SessionClaims>(&token, h.clock.now()).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.email, "alice@x.com");
        assert_eq!(claims.role, Role::User);
    }

    #[tokio::test]
    async fn confirm_email_verification_is_idempotent() {
        let h = Harness::new();
        let user = h.svc.register(alice()).await.unwrap();
        let token = h.verify_token("alice@x.com");

        assert_eq!(
            h.svc.confirm_email_verification(&token).await.unwrap(),
            VerificationOutcome::Verified
        );
        assert_eq!(
            h.svc.confirm_email_verification(&token).await.unwrap(),
            VerificationOutcome::AlreadyVerified
        );
        assert!(h.store.find_by_id(user.id).await.unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn confirm_email_verification_passes_token_errors_through() {
        let h = Harness::new();
        h.svc.register(alice()).await.unwrap();
        let token = h.verify_token("alice@x.com");
        h.clock.advance(Duration::minutes(5) + Duration::seconds(1));

        let expired = h.svc.confirm_email_verification(&token).await.unwrap_err();
        assert!(matches!(expired, AppError::Auth(AuthError::TokenExpired)));

        let reset = h.reset_token("alice@x.com");
        let wrong_purpose = h.svc.confirm_email_verification(&reset).await.unwrap_err();
        assert!(matches!(wrong_purpose, AppError::Auth(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn verification_token_cannot_reset_password() {
        let h = Harness::new();
        h.svc.register(alice()).await.unwrap();
        let token = h.verify_token("alice@x.com");
        let err = h
            .svc
            .confirm_password_reset(&token, "newsecret".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::TokenInvalid)));
    }

    #[tokio::test]
    async fn password_reset_replaces_the_hash() {
        let h = Harness::new();
        h.svc.register(alice()).await.unwrap();
        h.svc
            .confirm_email_verification(&h.verify_token("alice@x.com"))
            .await
            .unwrap();

        h.svc.request_password_reset("alice@x.com").await.unwrap();
        h.svc
            .confirm_password_reset(&h.reset_token("alice@x.com"), "brand-new".into())
            .await
            .unwrap();

        assert!(h.svc.login("alice@x.com", "secret1").await.is_err());
        assert!(h.svc.login("alice@x.com", "brand-new").await.is_ok());

        let sent = h.sent_mail().await;
        assert!(sent
            .iter()
            .any(|m| m.body.contains("/user/password-reset/confirm?token=")));
    }

    #[tokio::test]
    async fn reset_for_vanished_account_is_not_found() {
        let h = Harness::new();
        let err = h
            .svc
            .confirm_password_reset(&h.reset_token("ghost@x.com"), "whatever".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn requests_for_unknown_email_are_not_found() {
        let h = Harness::new();
        assert!(matches!(
            h.svc.request_password_reset("nobody@x.com").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.svc.request_email_verification("nobody@x.com").await,
            Err(AppError::NotFound(_))
        ));
        assert!(h.sent_mail().await.is_empty());
    }

    #[tokio::test]
    async fn update_profile_checks_email_ownership_and_rehashes() {
        let h = Harness::new();
        let user = h.svc.register(alice()).await.unwrap();
        h.svc
            .register(Registration {
                username: "bob".into(),
                email: "bob@x.com".into(),
                password: "secret2".into(),
            })
            .await
            .unwrap();
        let me = identity_of(&user);

        let steal = ProfileUpdate {
            username: "alice".into(),
            email: "bob@x.com".into(),
            password: None,
        };
        assert!(matches!(
            h.svc.update_profile(&me, steal).await,
            Err(AppError::EmailTaken)
        ));

        let keep_email = ProfileUpdate {
            username: "alice-renamed".into(),
            email: "alice@x.com".into(),
            password: Some("another1".into()),
        };
        let updated = h.svc.update_profile(&me, keep_email).await.unwrap();
        assert_eq!(updated.username, "alice-renamed");
        assert_ne!(updated.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn profile_of_deleted_user_is_not_found() {
        let h = Harness::new();
        let user = h.svc.register(alice()).await.unwrap();
        let me = identity_of(&user);
        assert_eq!(h.svc.profile(&me).await.unwrap().username, "alice");

        h.svc.delete_user(user.id).await.unwrap();
        assert!(matches!(h.svc.profile(&me).await, Err(AppError::NotFound(_))));
        assert!(matches!(h.svc.delete_user(user.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_of_user_deleted_midway_is_not_found() {
        let store = Arc::new(VanishingStore::default());
        let (svc, _outbox, _worker) = service_over(store.clone(), Arc::new(Recording::default()), 16);
        let user = svc.register(alice()).await.unwrap();
        *store.vanish_on_lookup.lock().unwrap() = Some(user.id);

        let update = ProfileUpdate {
            username: "alice-renamed".into(),
            email: "alice@x.com".into(),
            password: None,
        };
        let err = svc.update_profile(&identity_of(&user), update).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_succeeds_when_delivery_fails() {
        let store = Arc::new(InMemoryUserStore::new());
        let (svc, outbox, worker) = service_over(store.clone(), Arc::new(FailingMailer), 16);

        let user = svc.register(alice()).await.unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().is_some());

        drop(svc);
        drop(outbox);
        assert_eq!(worker.drain(std::time::Duration::from_secs(5)).await, Some(0));
    }

    #[tokio::test]
    async fn register_succeeds_when_mail_queue_is_full() {
        let store = Arc::new(InMemoryUserStore::new());
        let mailer = Arc::new(StalledMailer::default());
        let (svc, outbox, _worker) = service_over(store.clone(), mailer.clone(), 1);

        // worker holds the first message forever, the second fills the queue
        outbox.enqueue(filler()).unwrap();
        mailer.started.notified().await;
        outbox.enqueue(filler()).unwrap();

        let user = svc.register(alice()).await.unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().is_some());
        assert!(matches!(
            outbox.enqueue(filler()),
            Err(MailError::QueueFull)
        ));
    }
}
