use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use super::{PgDb, UnknownVariant};

pub const MASKED_SECRET: &str = "********";

/// How the outbound connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Implicit TLS from the first byte (usually port 465).
    Tls,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    #[default]
    Starttls,
    /// No transport security. Local relays and test sinks only.
    None,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Tls => "tls",
            TlsMode::Starttls => "starttls",
            TlsMode::None => "none",
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tls" => Ok(TlsMode::Tls),
            "starttls" => Ok(TlsMode::Starttls),
            "none" => Ok(TlsMode::None),
            other => Err(UnknownVariant {
                kind: "tls mode",
                value: other.to_string(),
            }),
        }
    }
}

impl sqlx::Type<PgDb> for TlsMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TlsMode {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        super::decode_text(value)
    }
}

/// An outbound mail profile. The password never leaves the process in clear text:
/// it is stored encrypted and serialized as a fixed mask.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MailConfig {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub tls_mode: TlsMode,
    pub username: String,
    #[serde(rename = "password", serialize_with = "mask_secret")]
    pub password_enc: Option<Vec<u8>>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn mask_secret<S: Serializer>(secret: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some(MASKED_SECRET),
        None => serializer.serialize_none(),
    }
}
