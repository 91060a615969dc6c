//! Outgoing e-mail.
//!
//! Delivery goes through a [`MailTransport`]. The service ships a transport
//! that writes messages to the log and one that keeps them in memory; an SMTP
//! relay can be plugged in behind the same trait.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::models::models::User;
use crate::templates::render_template;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub text_body: String,
    pub html_body: String,
}

pub trait MailTransport {
    fn send(&self, email: &Email) -> anyhow::Result<()>;
}

pub fn send_email(
    transport: &dyn MailTransport,
    subject: &str,
    sender: &str,
    recipients: &[String],
    text_body: &str,
    html_body: &str,
) -> anyhow::Result<()> {
    if recipients.is_empty() {
        anyhow::bail!("email {subject:?} has no recipients");
    }

    transport.send(&Email {
        subject: subject.to_string(),
        sender: sender.to_string(),
        recipients: recipients.to_vec(),
        text_body: text_body.to_string(),
        html_body: html_body.to_string(),
    })
}

/// Writes every message to the log instead of delivering it.
#[derive(Default)]
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn send(&self, email: &Email) -> anyhow::Result<()> {
        info!(
            subject = %email.subject,
            sender = %email.sender,
            recipients = ?email.recipients,
            "mail\n{}",
            email.text_body
        );
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Default)]
pub struct MemoryTransport {
    outbox: Mutex<Vec<Email>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.outbox.lock().clone()
    }
}

impl MailTransport for MemoryTransport {
    fn send(&self, email: &Email) -> anyhow::Result<()> {
        self.outbox.lock().push(email.clone());
        Ok(())
    }
}

pub fn send_password_reset_email(
    transport: &dyn MailTransport,
    config: &Config,
    user: &User,
    token: &str,
) -> anyhow::Result<()> {
    let expires = config.reset_token_expiration_minutes.to_string();
    let vars = [
        ("RESET_USERNAME", user.username.as_str()),
        ("RESET_TOKEN", token),
        ("RESET_EXPIRES_MINUTES", expires.as_str()),
    ];
    let text_body = render_template("email/reset_password.txt", &vars)?;
    let html_body = render_template("email/reset_password.html", &vars)?;

    send_email(
        transport,
        "[Microblog] Reset Your Password",
        &config.mail_sender,
        &[user.email.clone()],
        &text_body,
        &html_body,
    )
}

/// Mails a failure report to the configured admins. Delivery problems are
/// only logged.
pub fn notify_admins(transport: &dyn MailTransport, config: &Config, method: &str, path: &str, failure: &str) {
    if config.admins.is_empty() {
        return;
    }

    let text_body = format!("{method} {path} failed:\n\n{failure}\n");
    let html_body = format!(
        "<p><code>{} {}</code> failed:</p><pre>{}</pre>",
        html_escape::encode_text(method),
        html_escape::encode_text(path),
        html_escape::encode_text(failure)
    );

    if let Err(e) = send_email(
        transport,
        "Microblog Failure",
        &config.mail_sender,
        &config.admins,
        &text_body,
        &html_body,
    ) {
        error!("Failed to notify admins: {e:#}");
    }
}
