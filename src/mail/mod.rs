//! Transactional email delivery: template rendering, pooled transports and the
//! retrying delivery engine.

pub mod cache;
pub mod engine;
pub mod registry;
pub mod render;
pub mod request;
pub mod transport;

pub use cache::TransporterCache;
pub use engine::Mailer;
pub use request::SendRequest;
pub use transport::{MailTransport, OutgoingEmail, TransportError, TransportFactory};

use uuid::Uuid;

/// Errors raised while accepting a send. Delivery failures never surface here;
/// they are recorded on the history row instead.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// `None` means no explicit id was given and there is no active default.
    #[error("no active mail configuration found")]
    ConfigNotFound(Option<Uuid>),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template {0} is inactive")]
    TemplateInactive(Uuid),

    #[error("history record {0} not found")]
    HistoryNotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    /// Only raised by synchronous test sends; background delivery records transport errors instead.
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("credential error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
