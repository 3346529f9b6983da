//! Email delivery over authenticated SMTP.

use super::{NotificationEvent, Notifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Sends change events as plain-text email.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    subject: String,
}

impl EmailNotifier {
    /// Build the notifier, authenticating as the `from` address.
    /// Address parse failures are configuration-fatal, so they
    /// surface here rather than at delivery time.
    pub fn new(from: &str, to: &str, subject: &str, config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = from.parse().context("invalid from address")?;
        let to: Mailbox = to.parse().context("invalid to address")?;

        let credentials = Credentials::new(from.email.to_string(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .context("SMTP relay error")?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from,
            to,
            subject: subject.to_string(),
        })
    }
}

/// Plain-text message body.
fn message_body(event: &NotificationEvent) -> String {
    let mut body = format!("URL: {}\r\n", event.target_url);
    if let Some(text) = &event.text {
        body.push_str(&format!("Text: {text}\r\n"));
    }
    body
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(&self.subject)
            .body(message_body(event))
            .context("failed to build message")?;

        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_with_text() {
        let event = NotificationEvent::new("http://x", Some("CLOSED".to_string()));
        assert_eq!(message_body(&event), "URL: http://x\r\nText: CLOSED\r\n");
    }

    #[test]
    fn test_message_body_without_text() {
        let event = NotificationEvent::new("http://x", None);
        assert_eq!(message_body(&event), "URL: http://x\r\n");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 465,
            password: "secret".to_string(),
        };
        assert!(EmailNotifier::new("not-an-address", "to@example.com", "s", &config).is_err());
        assert!(EmailNotifier::new("from@example.com", "nope", "s", &config).is_err());
    }
}
