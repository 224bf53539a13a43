use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::{Language, PgDb, UnknownVariant, Variables};

/// Delivery state of one history lineage.
///
/// ```text
/// PENDING -> SENDING -> SENT
///               |  ^
///               v  |
///              RETRY
///               |
///               v
///             FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Retry,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Sending,
        DeliveryStatus::Sent,
        DeliveryStatus::Failed,
        DeliveryStatus::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Sending => "SENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Retry => "RETRY",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant {
                kind: "delivery status",
                value: s.to_string(),
            })
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        super::decode_text(value)
    }
}

/// One send lineage: the original attempt plus its retries.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MailHistory {
    pub id: Uuid,
    pub template_id: Option<Uuid>,
    pub config_id: Option<Uuid>,
    pub to_email: String,
    pub to_name: Option<String>,
    pub cc_emails: Vec<String>,
    pub bcc_emails: Vec<String>,
    pub subject: String,
    pub body: String,
    pub variables: Json<Variables>,
    pub language: Language,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub resent_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}
