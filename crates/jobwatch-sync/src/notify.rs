//! New-listing notifications.

use async_trait::async_trait;
use jobwatch_core::Listing;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid mailbox {value:?}: {source}")]
    Address {
        value: String,
        source: lettre::address::AddressError,
    },
    #[error("building message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp delivery: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
}

/// Plain-text summary of freshly inserted listings, `None` when there are none.
pub fn compose_digest(new_listings: &[Listing]) -> Option<Digest> {
    if new_listings.is_empty() {
        return None;
    }
    let body = new_listings
        .iter()
        .map(|l| format!("{} - {} - {}\n{}", l.title, l.company, l.location, l.url))
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(Digest {
        subject: format!("Nouvelles annonces ({})", new_listings.len()),
        body,
    })
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, new_listings: &[Listing]) -> Result<(), NotificationError>;
}

/// Used when no delivery channel is configured.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, new_listings: &[Listing]) -> Result<(), NotificationError> {
        debug!(count = new_listings.len(), "notifications disabled");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

/// Sends the digest over an authenticated STARTTLS connection.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn parse_mailbox(value: &str) -> Result<Mailbox, NotificationError> {
    value
        .parse()
        .map_err(|source| NotificationError::Address {
            value: value.to_string(),
            source,
        })
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotificationError> {
        let from = parse_mailbox(&config.from)?;
        let to = parse_mailbox(&config.to)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(config.username, config.password))
            .build();
        Ok(Self {
            transport,
            from,
            to,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, new_listings: &[Listing]) -> Result<(), NotificationError> {
        let Some(digest) = compose_digest(new_listings) else {
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(digest.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(digest.body)?;
        self.transport.send(message).await?;

        info!(count = new_listings.len(), to = %self.to, "notification email sent");
        Ok(())
    }
}
