use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use super::MailError;
use crate::crypto;
use crate::models::{MailConfig, MailHistory, TlsMode};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build transport: {0}")]
    Build(String),
    #[error("connection check failed: {0}")]
    Verify(String),
    #[error("invalid message: {0}")]
    Message(String),
    #[error("failed to send email: {0}")]
    Send(String),
}

/// A configuration resolved for sending: credentials decrypted, retry policy typed.
#[derive(Clone)]
pub struct MailProfile {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub tls_mode: TlsMode,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// `updated_at` of the configuration row this profile was read from.
    pub revision: DateTime<Utc>,
}

impl MailProfile {
    pub fn from_config(config: &MailConfig, encryption_key: &str) -> Result<Self, MailError> {
        let password = match &config.password_enc {
            Some(enc) => crypto::decrypt(enc, encryption_key).map_err(MailError::Crypto)?,
            None => String::new(),
        };

        Ok(Self {
            id: config.id,
            host: config.host.clone(),
            port: u16::try_from(config.port)
                .map_err(|_| MailError::Validation(format!("invalid port {}", config.port)))?,
            tls_mode: config.tls_mode,
            username: config.username.clone(),
            password,
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
            max_retries: config.max_retries.max(0) as u32,
            retry_delay: Duration::from_secs(config.retry_delay_seconds.max(1) as u64),
            revision: config.updated_at,
        })
    }

    pub fn from_header(&self) -> String {
        match &self.from_name {
            Some(name) => format!("{} <{}>", name, self.from_address),
            None => self.from_address.clone(),
        }
    }
}

impl std::fmt::Debug for MailProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailProfile")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls_mode", &self.tls_mode)
            .field("username", &self.username)
            .field("from_address", &self.from_address)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

/// A fully rendered message, ready for a transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to_email: String,
    pub to_name: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingEmail {
    pub fn from_history(history: &MailHistory, profile: &MailProfile) -> Self {
        Self {
            from: profile.from_header(),
            to_email: history.to_email.clone(),
            to_name: history.to_name.clone(),
            cc: history.cc_emails.clone(),
            bcc: history.bcc_emails.clone(),
            subject: history.subject.clone(),
            body: history.body.clone(),
        }
    }

    pub fn to_message(&self) -> Result<Message, TransportError> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            TransportError::Message(format!("invalid {what} address: {e}"))
        };

        let from: Mailbox = self.from.parse().map_err(|e| invalid("from", &e))?;
        let to = Mailbox::new(
            self.to_name.clone(),
            self.to_email.parse().map_err(|e| invalid("to", &e))?,
        );

        let mut builder = Message::builder().from(from).to(to).subject(&self.subject);
        for cc in &self.cc {
            builder = builder.cc(cc.parse().map_err(|e| invalid("cc", &e))?);
        }
        for bcc in &self.bcc {
            builder = builder.bcc(bcc.parse().map_err(|e| invalid("bcc", &e))?);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(self.body.clone())
            .map_err(|e| TransportError::Message(format!("failed to build email: {e}")))
    }
}

/// A live outbound connection bound to one configuration. Shared across
/// concurrent sends, so implementations must be safe for concurrent use.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Round-trip handshake against the endpoint.
    async fn verify(&self) -> Result<(), TransportError>;
    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}

/// Builds transports for configurations. Building is cheap; connecting happens in `verify`.
pub trait TransportFactory: Send + Sync {
    fn build(&self, profile: &MailProfile) -> Result<Arc<dyn MailTransport>, TransportError>;
}

/// Pooled SMTP over lettre.
pub struct SmtpTransportFactory {
    pool_size: u32,
    timeout: Duration,
}

impl SmtpTransportFactory {
    pub fn new(pool_size: u32, timeout: Duration) -> Self {
        Self { pool_size, timeout }
    }
}

impl TransportFactory for SmtpTransportFactory {
    fn build(&self, profile: &MailProfile) -> Result<Arc<dyn MailTransport>, TransportError> {
        let builder = match profile.tls_mode {
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&profile.host)
                .map_err(|e| TransportError::Build(format!("SMTP relay error: {e}")))?,
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&profile.host)
                .map_err(|e| TransportError::Build(format!("SMTP starttls error: {e}")))?,
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&profile.host),
        };

        let mut builder = builder
            .port(profile.port)
            .timeout(Some(self.timeout))
            .pool_config(PoolConfig::new().max_size(self.pool_size));

        if !profile.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                profile.username.clone(),
                profile.password.clone(),
            ));
        }

        Ok(Arc::new(SmtpTransport {
            inner: builder.build(),
        }))
    }
}

struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn verify(&self) -> Result<(), TransportError> {
        match self.inner.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::Verify("server refused the connection".to_string())),
            Err(e) => Err(TransportError::Verify(e.to_string())),
        }
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let message = email.to_message()?;
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }
}

/// Logs messages instead of delivering them. For local development.
pub struct LogTransportFactory;

impl TransportFactory for LogTransportFactory {
    fn build(&self, profile: &MailProfile) -> Result<Arc<dyn MailTransport>, TransportError> {
        Ok(Arc::new(LogTransport { config_id: profile.id }))
    }
}

struct LogTransport {
    config_id: Uuid,
}

#[async_trait]
impl MailTransport for LogTransport {
    async fn verify(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        email.to_message()?;
        tracing::info!(
            config_id = %self.config_id,
            to = %email.to_email,
            subject = %email.subject,
            "Email logged (log transport, not delivered)"
        );
        Ok(())
    }
}
