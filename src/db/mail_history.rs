use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{DeliveryStatus, Language, MailHistory, Variables};

pub struct NewHistory {
    pub template_id: Option<Uuid>,
    pub config_id: Option<Uuid>,
    pub to_email: String,
    pub to_name: Option<String>,
    pub cc_emails: Vec<String>,
    pub bcc_emails: Vec<String>,
    pub subject: String,
    pub body: String,
    pub variables: Variables,
    pub language: Language,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub resent_from: Option<Uuid>,
}

#[derive(Default)]
pub struct HistoryFilter {
    pub status: Option<DeliveryStatus>,
    pub to_email: Option<String>,
    pub template_id: Option<Uuid>,
    pub config_id: Option<Uuid>,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

const FILTER: &str = "deleted_at IS NULL
    AND ($1::text IS NULL OR status = $1)
    AND ($2::text IS NULL OR to_email ILIKE $2 ESCAPE '\\')
    AND ($3::uuid IS NULL OR template_id = $3)
    AND ($4::uuid IS NULL OR config_id = $4)
    AND ($5::text IS NULL OR related_type = $5)
    AND ($6::text IS NULL OR related_id = $6)
    AND ($7::timestamptz IS NULL OR created_at >= $7)
    AND ($8::timestamptz IS NULL OR created_at < $8)";

pub async fn insert(pool: &PgPool, new: &NewHistory) -> Result<MailHistory, sqlx::Error> {
    sqlx::query_as::<_, MailHistory>(
        "INSERT INTO mail_history (id, template_id, config_id, to_email, to_name, cc_emails,
             bcc_emails, subject, body, variables, language, status, attempts,
             related_type, related_id, resent_from)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'PENDING', 0, $12, $13, $14)
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(new.template_id)
    .bind(new.config_id)
    .bind(&new.to_email)
    .bind(new.to_name.as_deref())
    .bind(&new.cc_emails)
    .bind(&new.bcc_emails)
    .bind(&new.subject)
    .bind(&new.body)
    .bind(Json(&new.variables))
    .bind(new.language.as_str())
    .bind(new.related_type.as_deref())
    .bind(new.related_id.as_deref())
    .bind(new.resent_from)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<MailHistory>, sqlx::Error> {
    sqlx::query_as::<_, MailHistory>(
        "SELECT * FROM mail_history WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn mark_sending(pool: &PgPool, id: Uuid, attempts: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE mail_history SET status = 'SENDING', attempts = $2, updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(attempts)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_sent(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE mail_history SET status = 'SENT', sent_at = now(), error_message = NULL,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed attempt. `status` is either `RETRY` or `FAILED`.
pub async fn mark_failure(
    pool: &PgPool,
    id: Uuid,
    status: DeliveryStatus,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE mail_history SET status = $2, error_message = $3, updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(
    pool: &PgPool,
    filter: &HistoryFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<MailHistory>, sqlx::Error> {
    sqlx::query_as::<_, MailHistory>(&format!(
        "SELECT * FROM mail_history WHERE {FILTER}
         ORDER BY created_at DESC LIMIT $9 OFFSET $10"
    ))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.to_email.as_deref().map(super::contains_pattern))
    .bind(filter.template_id)
    .bind(filter.config_id)
    .bind(filter.related_type.as_deref())
    .bind(filter.related_id.as_deref())
    .bind(filter.from)
    .bind(filter.to)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &PgPool, filter: &HistoryFilter) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM mail_history WHERE {FILTER}"))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.to_email.as_deref().map(super::contains_pattern))
        .bind(filter.template_id)
        .bind(filter.config_id)
        .bind(filter.related_type.as_deref())
        .bind(filter.related_id.as_deref())
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE mail_history SET deleted_at = now(), updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: DeliveryStatus,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DailyVolume {
    pub day: NaiveDate,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TemplateUsage {
    pub template_id: Uuid,
    pub code: Option<String>,
    pub count: i64,
}

pub async fn status_counts(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<StatusCount>, sqlx::Error> {
    sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM mail_history
         WHERE deleted_at IS NULL AND created_at >= $1
         GROUP BY status",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

pub async fn daily_volume(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<DailyVolume>, sqlx::Error> {
    sqlx::query_as::<_, DailyVolume>(
        "SELECT (created_at AT TIME ZONE 'UTC')::date AS day,
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'SENT') AS sent,
                COUNT(*) FILTER (WHERE status = 'FAILED') AS failed
         FROM mail_history
         WHERE deleted_at IS NULL AND created_at >= $1
         GROUP BY day
         ORDER BY day ASC",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

pub async fn top_templates(
    pool: &PgPool,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TemplateUsage>, sqlx::Error> {
    sqlx::query_as::<_, TemplateUsage>(
        "SELECT h.template_id AS template_id, t.code AS code, COUNT(*) AS count
         FROM mail_history h
         LEFT JOIN mail_templates t ON t.id = h.template_id
         WHERE h.deleted_at IS NULL AND h.created_at >= $1 AND h.template_id IS NOT NULL
         GROUP BY h.template_id, t.code
         ORDER BY count DESC
         LIMIT $2",
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
}
