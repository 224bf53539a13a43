use serde::Deserialize;
use uuid::Uuid;

use crate::models::{Language, Variables};

/// A request to send one email, either from a template or with caller-supplied content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    pub template_id: Option<Uuid>,
    pub config_id: Option<Uuid>,
    pub to_email: String,
    pub to_name: Option<String>,
    #[serde(default)]
    pub cc_emails: Vec<String>,
    #[serde(default)]
    pub bcc_emails: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub language: Language,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
}

impl SendRequest {
    pub fn to(to_email: impl Into<String>) -> Self {
        Self {
            to_email: to_email.into(),
            ..Default::default()
        }
    }

    pub fn template(mut self, template_id: Uuid) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn content(mut self, subject: impl Into<String>, body: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.body = Some(body.into());
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key, value);
        self
    }

    pub fn config(mut self, config_id: Uuid) -> Self {
        self.config_id = Some(config_id);
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn related(mut self, related_type: impl Into<String>, related_id: impl Into<String>) -> Self {
        self.related_type = Some(related_type.into());
        self.related_id = Some(related_id.into());
        self
    }
}
