//! SMTP delivery over STARTTLS.

use super::{MailError, Outbox};
use crate::config::{Config, SmtpConfig};
use anyhow::Result;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Sends each message on its own connection: connect, STARTTLS, log in,
/// send, quit. Nothing is pooled or retried.
pub struct SmtpOutbox {
    smtp: SmtpConfig,
    credentials: Credentials,
}

impl SmtpOutbox {
    pub fn new(smtp: SmtpConfig, username: String, password: String) -> Self {
        Self {
            smtp,
            credentials: Credentials::new(username, password),
        }
    }

    /// Log in as the configured sender, with the password from config or env
    pub fn from_config(config: &Config) -> Result<Self> {
        let password = config.sender.resolve_password()?;
        Ok(Self::new(
            config.smtp.clone(),
            config.sender.email.clone(),
            password,
        ))
    }

    fn transport(&self) -> Result<SmtpTransport, MailError> {
        Ok(SmtpTransport::starttls_relay(&self.smtp.host)?
            .port(self.smtp.port)
            .credentials(self.credentials.clone())
            .build())
    }
}

impl Outbox for SmtpOutbox {
    fn deliver(&mut self, message: &Message) -> Result<(), MailError> {
        let mailer = self.transport()?;
        tracing::debug!(host = %self.smtp.host, port = self.smtp.port, "connecting to SMTP relay");
        mailer.send(message)?;
        Ok(())
    }
}
