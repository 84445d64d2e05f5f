use time::Duration;

use super::OutgoingMail;

/// Builds the verification and reset messages with links back to this service.
#[derive(Debug, Clone)]
pub struct MailTemplates {
    base_url: String,
}

impl MailTemplates {
    pub fn new(public_base_url: &str) -> Self {
        Self {
            base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn email_verification(&self, to: &str, token: &str, ttl: Duration) -> OutgoingMail {
        let link = format!("{}/user/email/verify?token={}", self.base_url, token);
        OutgoingMail {
            to: to.to_string(),
            subject: "Verify your email".into(),
            body: format!(
                "Click the link below to verify your email address:\n\n{link}\n\n{}",
                expiry_note(ttl)
            ),
        }
    }

    pub fn password_reset(&self, to: &str, token: &str, ttl: Duration) -> OutgoingMail {
        let link = format!("{}/user/password-reset/confirm?token={}", self.base_url, token);
        OutgoingMail {
            to: to.to_string(),
            subject: "Password reset request".into(),
            body: format!(
                "Click the link below to reset your password:\n\n{link}\n\n{}",
                expiry_note(ttl)
            ),
        }
    }
}

fn expiry_note(ttl: Duration) -> String {
    format!(
        "Please note that the link expires in {} minutes.",
        ttl.whole_minutes()
    )
}
