use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use uuid::Uuid;

use super::{Language, LocalizedText};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MailTemplate {
    pub id: Uuid,
    pub code: String,
    pub name: Json<LocalizedText>,
    pub description: Json<LocalizedText>,
    pub subject: Json<LocalizedText>,
    pub body: Json<LocalizedText>,
    /// Declared placeholder names. Informational, never checked at render time.
    pub variables: Vec<String>,
    pub trigger_event: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MailTemplate {
    pub fn subject_for(&self, lang: Language) -> &str {
        self.subject.get(lang)
    }

    pub fn body_for(&self, lang: Language) -> &str {
        self.body.get(lang)
    }
}
