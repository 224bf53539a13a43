use uuid::Uuid;

use super::engine::Mailer;
use super::transport::{MailProfile, OutgoingEmail};
use super::MailError;
use crate::db;
use crate::db::mail_configs::{ConfigPatch, NewConfig};
use crate::models::MailConfig;

pub const TEST_SUBJECT: &str = "Mail configuration test";
pub const TEST_BODY: &str =
    "<p>This is a test email. Your outbound mail configuration is working.</p>";

impl Mailer {
    /// `Some(id)`: that configuration if it is active. `None`: the active default.
    pub async fn resolve_config(&self, id: Option<Uuid>) -> Result<MailConfig, MailError> {
        let config = match id {
            Some(id) => db::mail_configs::find_active(&self.pool, id).await?,
            None => db::mail_configs::find_default(&self.pool).await?,
        };
        config.ok_or(MailError::ConfigNotFound(id))
    }

    /// Create a configuration. When it is the default, every other default is cleared first.
    pub async fn create_config(&self, new: &NewConfig) -> Result<MailConfig, MailError> {
        validate_policy(Some(new.port), Some(new.max_retries), Some(new.retry_delay_seconds))?;
        db::mail_configs::create(&self.pool, new)
            .await
            .map_err(default_race_to_conflict)
    }

    /// Apply a patch and evict the cached transport so the next send reconnects.
    pub async fn update_config(&self, id: Uuid, patch: &ConfigPatch) -> Result<MailConfig, MailError> {
        validate_policy(patch.port, patch.max_retries, patch.retry_delay_seconds)?;
        let config = db::mail_configs::update(&self.pool, id, patch)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => MailError::ConfigNotFound(Some(id)),
                other => default_race_to_conflict(other),
            })?;
        self.transports.invalidate(id);
        Ok(config)
    }

    /// Soft-delete a configuration. The current default cannot be deleted.
    pub async fn delete_config(&self, id: Uuid) -> Result<(), MailError> {
        let config = db::mail_configs::find_by_id(&self.pool, id)
            .await?
            .ok_or(MailError::ConfigNotFound(Some(id)))?;
        if config.is_default {
            return Err(MailError::Validation(
                "the default configuration cannot be deleted".to_string(),
            ));
        }

        db::mail_configs::soft_delete(&self.pool, id).await?;
        self.transports.invalidate(id);
        Ok(())
    }

    /// Connect with a fresh transport and send a fixed message synchronously.
    pub async fn test_config(&self, id: Uuid, to_email: &str) -> Result<(), MailError> {
        let config = db::mail_configs::find_by_id(&self.pool, id)
            .await?
            .ok_or(MailError::ConfigNotFound(Some(id)))?;
        let profile = MailProfile::from_config(&config, &self.encryption_key)?;

        to_email
            .parse::<lettre::Address>()
            .map_err(|e| MailError::Validation(format!("invalid email address '{to_email}': {e}")))?;

        let email = OutgoingEmail {
            from: profile.from_header(),
            to_email: to_email.to_string(),
            to_name: None,
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: TEST_SUBJECT.to_string(),
            body: TEST_BODY.to_string(),
        };

        let transport = self.transports.connect_uncached(&profile).await?;
        transport.send(&email).await?;
        tracing::info!(config_id = %id, "Test email sent");
        Ok(())
    }
}

/// Two concurrent promotions can both clear the old default; the partial unique
/// index rejects the second commit.
fn default_race_to_conflict(err: sqlx::Error) -> MailError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return MailError::Conflict(
                "another configuration was made default concurrently".to_string(),
            );
        }
    }
    MailError::Database(err)
}

fn validate_policy(
    port: Option<i32>,
    max_retries: Option<i32>,
    retry_delay_seconds: Option<i32>,
) -> Result<(), MailError> {
    if let Some(port) = port {
        if !(1..=65535).contains(&port) {
            return Err(MailError::Validation(format!("port {port} is out of range")));
        }
    }
    if max_retries.is_some_and(|n| n < 0) {
        return Err(MailError::Validation("max_retries must not be negative".to_string()));
    }
    if retry_delay_seconds.is_some_and(|n| n <= 0) {
        return Err(MailError::Validation("retry_delay_seconds must be positive".to_string()));
    }
    Ok(())
}
