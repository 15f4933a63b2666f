use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::info;

use crate::auth::services::mask_email;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Logs outgoing mail instead of delivering it.
#[derive(Debug, Clone)]
pub struct LogMailer {
    pub from: String,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(
            from = %self.from,
            to = %mask_email(&email.to),
            subject = %email.subject,
            html_len = email.html.len(),
            "email queued (log transport)"
        );
        Ok(())
    }
}

/// `name` comes from the signup request; both it and `link` are escaped.
pub fn verification_email(to: &str, name: &str, link: &str) -> Email {
    let name = encode_text(name);
    let link = encode_double_quoted_attribute(link);
    Email {
        to: to.to_string(),
        subject: "Verify your email - Newsdesk".into(),
        html: format!(
            "<!DOCTYPE html><html><body>\
             <h2>Hi {name},</h2>\
             <p>Thanks for signing up! Please verify your email address:</p>\
             <p><a href=\"{link}\">Verify Email</a></p>\
             <p>This link expires in 24 hours.</p>\
             </body></html>"
        ),
    }
}

pub fn password_reset_email(to: &str, name: &str, link: &str) -> Email {
    let name = encode_text(name);
    let link = encode_double_quoted_attribute(link);
    Email {
        to: to.to_string(),
        subject: "Reset your password - Newsdesk".into(),
        html: format!(
            "<!DOCTYPE html><html><body>\
             <h2>Hi {name},</h2>\
             <p>We received a request to reset your password:</p>\
             <p><a href=\"{link}\">Reset Password</a></p>\
             <p>This link expires in 1 hour. If you did not ask for a reset, ignore this email.</p>\
             </body></html>"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_embed_link_and_recipient() {
        let e = verification_email("a@b.io", "Ada", "http://x/verify-email?token=t1");
        assert_eq!(e.to, "a@b.io");
        assert!(e.html.contains("http://x/verify-email?token=t1"));
        assert!(e.html.contains("Hi Ada"));

        let r = password_reset_email("a@b.io", "Ada", "http://x/reset-password?token=t2");
        assert!(r.subject.contains("Reset"));
        assert!(r.html.contains("token=t2"));
    }

    #[test]
    fn user_supplied_name_cannot_inject_markup() {
        let e = verification_email(
            "a@b.io",
            "<a href=\"https://evil.test\">Click</a>",
            "http://x/verify-email?token=t1\"><script>",
        );
        assert!(!e.html.contains("evil.test\">"));
        assert!(e.html.contains("&lt;a href="));
        assert!(!e.html.contains("<script>"));

        let r = password_reset_email("a@b.io", "<b>Ada</b>", "http://x/r?token=t2");
        assert!(r.html.contains("Hi &lt;b&gt;Ada&lt;/b&gt;,"));
    }

    #[tokio::test]
    async fn log_mailer_never_fails() {
        let m = LogMailer { from: "noreply@x".into() };
        m.send(verification_email("a@b.io", "Ada", "l")).await.unwrap();
    }
}
