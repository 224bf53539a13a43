pub mod audit_event;
pub mod localized;
pub mod mail_config;
pub mod mail_history;
pub mod mail_template;
pub mod variables;

pub use audit_event::AuditEvent;
pub use localized::{Language, LocalizedText};
pub use mail_config::{MailConfig, TlsMode};
pub use mail_history::{DeliveryStatus, MailHistory};
pub use mail_template::MailTemplate;
pub use variables::Variables;

type PgDb = sqlx::Postgres;

/// Decode a TEXT column into one of the string-backed enums in this module.
fn decode_text<T>(value: sqlx::postgres::PgValueRef<'_>) -> Result<T, sqlx::error::BoxDynError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
    Ok(s.parse::<T>()?)
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
