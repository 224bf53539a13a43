use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::cache::TransporterCache;
use super::render::render;
use super::request::SendRequest;
use super::transport::{MailProfile, OutgoingEmail};
use super::MailError;
use crate::db;
use crate::db::mail_history::NewHistory;
use crate::models::{DeliveryStatus, Language, MailHistory, MailTemplate, Variables};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

/// What to do after a failed transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterFailure {
    Retry,
    Fail,
}

/// `attempt` is zero-based: the first try of a lineage is attempt 0, so a lineage
/// makes at most `max_retries + 1` transport attempts.
pub(crate) fn after_failure(attempt: u32, max_retries: u32) -> AfterFailure {
    if attempt < max_retries {
        AfterFailure::Retry
    } else {
        AfterFailure::Fail
    }
}

/// One scheduled invocation of the delivery loop. The attempt count travels with
/// the job rather than being re-read from the history row.
struct DeliveryJob {
    history_id: Uuid,
    attempt: u32,
    profile: MailProfile,
    email: OutgoingEmail,
}

/// The delivery engine: accepts sends, persists them, and drives each history
/// row through `PENDING -> SENDING -> SENT | RETRY | FAILED` on background tasks.
pub struct Mailer {
    pub(super) pool: PgPool,
    pub(super) encryption_key: String,
    pub(super) transports: TransporterCache,
}

impl Mailer {
    pub fn new(pool: PgPool, encryption_key: String, transports: TransporterCache) -> Self {
        Self {
            pool,
            encryption_key,
            transports,
        }
    }

    pub fn transports(&self) -> &TransporterCache {
        &self.transports
    }

    /// Render a template the same way a live send would, without sending anything.
    pub async fn preview(
        &self,
        template_id: Uuid,
        variables: &Variables,
        language: Language,
    ) -> Result<RenderedContent, MailError> {
        let template = db::mail_templates::find_by_id(&self.pool, template_id)
            .await?
            .ok_or_else(|| MailError::TemplateNotFound(template_id.to_string()))?;
        Ok(render_template(&template, variables, language))
    }

    /// Accept a send: resolve configuration, render, persist a `PENDING` row and
    /// hand it to the background loop. Returns before any network I/O.
    pub async fn send(self: &Arc<Self>, req: SendRequest) -> Result<MailHistory, MailError> {
        let config = self.resolve_config(req.config_id).await?;
        let profile = MailProfile::from_config(&config, &self.encryption_key)?;

        let content = match req.template_id {
            Some(template_id) => {
                let template = db::mail_templates::find_by_id(&self.pool, template_id)
                    .await?
                    .ok_or_else(|| MailError::TemplateNotFound(template_id.to_string()))?;
                if !template.is_active {
                    return Err(MailError::TemplateInactive(template_id));
                }
                render_template(&template, &req.variables, req.language)
            }
            None => RenderedContent {
                subject: render(req.subject.as_deref().unwrap_or_default(), &req.variables),
                body: render(req.body.as_deref().unwrap_or_default(), &req.variables),
            },
        };

        if content.subject.trim().is_empty() {
            return Err(MailError::Validation("subject must not be empty".to_string()));
        }
        if content.body.trim().is_empty() {
            return Err(MailError::Validation("body must not be empty".to_string()));
        }
        validate_recipients(&req)?;

        let history = db::mail_history::insert(
            &self.pool,
            &NewHistory {
                template_id: req.template_id,
                config_id: Some(config.id),
                to_email: req.to_email.trim().to_string(),
                to_name: req.to_name,
                cc_emails: req.cc_emails,
                bcc_emails: req.bcc_emails,
                subject: content.subject,
                body: content.body,
                variables: req.variables,
                language: req.language,
                related_type: req.related_type,
                related_id: req.related_id,
                resent_from: None,
            },
        )
        .await?;

        tracing::info!(
            history_id = %history.id,
            config_id = %config.id,
            template_id = ?history.template_id,
            "Email accepted"
        );

        self.dispatch(&history, profile);
        Ok(history)
    }

    /// Send using the active template registered for `trigger_event`.
    pub async fn send_event(
        self: &Arc<Self>,
        trigger_event: &str,
        mut req: SendRequest,
    ) -> Result<MailHistory, MailError> {
        let template = db::mail_templates::find_active_by_trigger(&self.pool, trigger_event)
            .await?
            .ok_or_else(|| MailError::TemplateNotFound(format!("trigger event {trigger_event}")))?;
        req.template_id = Some(template.id);
        self.send(req).await
    }

    /// Start a new lineage from an existing row, copying its rendered content verbatim.
    /// The source row is never touched.
    pub async fn resend(
        self: &Arc<Self>,
        history_id: Uuid,
        config_id: Option<Uuid>,
    ) -> Result<MailHistory, MailError> {
        let source = db::mail_history::find_by_id(&self.pool, history_id)
            .await?
            .ok_or(MailError::HistoryNotFound(history_id))?;

        let config = self.resolve_config(config_id.or(source.config_id)).await?;
        let profile = MailProfile::from_config(&config, &self.encryption_key)?;

        let history = db::mail_history::insert(
            &self.pool,
            &NewHistory {
                template_id: source.template_id,
                config_id: Some(config.id),
                to_email: source.to_email.clone(),
                to_name: source.to_name.clone(),
                cc_emails: source.cc_emails.clone(),
                bcc_emails: source.bcc_emails.clone(),
                subject: source.subject.clone(),
                body: source.body.clone(),
                variables: source.variables.0.clone(),
                language: source.language,
                related_type: source.related_type.clone(),
                related_id: source.related_id.clone(),
                resent_from: Some(source.id),
            },
        )
        .await?;

        tracing::info!(
            history_id = %history.id,
            resent_from = %source.id,
            config_id = %config.id,
            "Email resend accepted"
        );

        self.dispatch(&history, profile);
        Ok(history)
    }

    fn dispatch(self: &Arc<Self>, history: &MailHistory, profile: MailProfile) {
        let job = DeliveryJob {
            history_id: history.id,
            attempt: 0,
            email: OutgoingEmail::from_history(history, &profile),
            profile,
        };
        let mailer = Arc::clone(self);
        tokio::spawn(async move { mailer.run_attempt(job).await });
    }

    fn schedule_retry(self: Arc<Self>, job: DeliveryJob) {
        let delay = job.profile.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.run_attempt(job).await;
        });
    }

    async fn run_attempt(self: Arc<Self>, mut job: DeliveryJob) {
        let attempts = job.attempt as i32 + 1;
        if let Err(e) = db::mail_history::mark_sending(&self.pool, job.history_id, attempts).await {
            tracing::error!(history_id = %job.history_id, "Failed to mark email as sending, abandoning lineage: {e}");
            return;
        }

        // Credentials and retry policy may have changed since the job was scheduled.
        let unusable = match self.reload_profile(job.profile.id).await {
            Ok(Some(profile)) => {
                job.email.from = profile.from_header();
                job.profile = profile;
                None
            }
            Ok(None) => Some(format!("mail configuration {} is no longer active", job.profile.id)),
            Err(MailError::Database(e)) => {
                tracing::error!(history_id = %job.history_id, "Failed to reload mail configuration, abandoning lineage: {e}");
                return;
            }
            Err(e) => Some(e.to_string()),
        };
        if let Some(error) = unusable {
            tracing::error!(history_id = %job.history_id, attempts, "Email delivery failed permanently: {error}");
            if let Err(e) = db::mail_history::mark_failure(
                &self.pool,
                job.history_id,
                DeliveryStatus::Failed,
                &error,
            )
            .await
            {
                tracing::error!(history_id = %job.history_id, "Failed to mark email as failed: {e}");
            }
            return;
        }

        let result = match self.transports.get(&job.profile).await {
            Ok(transport) => transport.send(&job.email).await,
            Err(e) => Err(e),
        };

        let error = match result {
            Ok(()) => {
                if let Err(e) = db::mail_history::mark_sent(&self.pool, job.history_id).await {
                    tracing::error!(history_id = %job.history_id, "Failed to mark email as sent: {e}");
                }
                tracing::info!(history_id = %job.history_id, attempts, "Email sent");
                return;
            }
            Err(e) => e.to_string(),
        };

        match after_failure(job.attempt, job.profile.max_retries) {
            AfterFailure::Retry => {
                tracing::warn!(
                    history_id = %job.history_id,
                    config_id = %job.profile.id,
                    attempts,
                    retry_in_secs = job.profile.retry_delay.as_secs(),
                    "Email delivery failed, will retry: {error}"
                );
                if let Err(e) = db::mail_history::mark_failure(
                    &self.pool,
                    job.history_id,
                    DeliveryStatus::Retry,
                    &error,
                )
                .await
                {
                    tracing::error!(history_id = %job.history_id, "Failed to mark email for retry: {e}");
                }
                job.attempt += 1;
                self.schedule_retry(job);
            }
            AfterFailure::Fail => {
                tracing::error!(
                    history_id = %job.history_id,
                    config_id = %job.profile.id,
                    attempts,
                    "Email delivery failed permanently: {error}"
                );
                if let Err(e) = db::mail_history::mark_failure(
                    &self.pool,
                    job.history_id,
                    DeliveryStatus::Failed,
                    &error,
                )
                .await
                {
                    tracing::error!(history_id = %job.history_id, "Failed to mark email as failed: {e}");
                }
            }
        }
    }
}

impl Mailer {
    /// Fresh profile for an active configuration, `None` once it is deleted or deactivated.
    async fn reload_profile(&self, config_id: Uuid) -> Result<Option<MailProfile>, MailError> {
        match db::mail_configs::find_active(&self.pool, config_id).await? {
            Some(config) => Ok(Some(MailProfile::from_config(&config, &self.encryption_key)?)),
            None => Ok(None),
        }
    }
}

fn render_template(template: &MailTemplate, variables: &Variables, language: Language) -> RenderedContent {
    RenderedContent {
        subject: render(template.subject_for(language), variables),
        body: render(template.body_for(language), variables),
    }
}

fn validate_recipients(req: &SendRequest) -> Result<(), MailError> {
    if req.to_email.trim().is_empty() {
        return Err(MailError::Validation("to_email is required".to_string()));
    }

    let all = std::iter::once(req.to_email.trim())
        .chain(req.cc_emails.iter().map(String::as_str))
        .chain(req.bcc_emails.iter().map(String::as_str));
    for address in all {
        address
            .parse::<lettre::Address>()
            .map_err(|e| MailError::Validation(format!("invalid email address '{address}': {e}")))?;
    }
    Ok(())
}
