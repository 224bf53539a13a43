use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{LocalizedText, MailTemplate};

pub struct NewTemplate {
    pub code: String,
    pub name: LocalizedText,
    pub description: LocalizedText,
    pub subject: LocalizedText,
    pub body: LocalizedText,
    pub variables: Vec<String>,
    pub trigger_event: Option<String>,
    pub is_active: bool,
}

#[derive(Default)]
pub struct TemplatePatch {
    pub code: Option<String>,
    pub name: Option<LocalizedText>,
    pub description: Option<LocalizedText>,
    pub subject: Option<LocalizedText>,
    pub body: Option<LocalizedText>,
    pub variables: Option<Vec<String>>,
    pub trigger_event: Option<String>,
    pub is_active: Option<bool>,
}

pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub trigger_event: Option<String>,
}

const FILTER: &str = "deleted_at IS NULL
    AND ($1::text IS NULL OR code ILIKE $1 ESCAPE '\\' OR name::text ILIKE $1 ESCAPE '\\')
    AND ($2::boolean IS NULL OR is_active = $2)
    AND ($3::text IS NULL OR trigger_event = $3)";

pub async fn list(pool: &PgPool, params: &ListParams) -> Result<Vec<MailTemplate>, sqlx::Error> {
    let pattern = params.search.as_deref().map(super::contains_pattern);
    sqlx::query_as::<_, MailTemplate>(&format!(
        "SELECT * FROM mail_templates WHERE {FILTER}
         ORDER BY created_at DESC LIMIT $4 OFFSET $5"
    ))
    .bind(pattern)
    .bind(params.is_active)
    .bind(params.trigger_event.as_deref())
    .bind(params.limit)
    .bind(params.offset)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &PgPool, params: &ListParams) -> Result<i64, sqlx::Error> {
    let pattern = params.search.as_deref().map(super::contains_pattern);
    let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM mail_templates WHERE {FILTER}"))
        .bind(pattern)
        .bind(params.is_active)
        .bind(params.trigger_event.as_deref())
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<MailTemplate>, sqlx::Error> {
    sqlx::query_as::<_, MailTemplate>(
        "SELECT * FROM mail_templates WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_active_by_trigger(
    pool: &PgPool,
    trigger_event: &str,
) -> Result<Option<MailTemplate>, sqlx::Error> {
    sqlx::query_as::<_, MailTemplate>(
        "SELECT * FROM mail_templates
         WHERE trigger_event = $1 AND is_active AND deleted_at IS NULL
         ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(trigger_event)
    .fetch_optional(pool)
    .await
}

/// Whether a live template other than `exclude` already uses `code`.
pub async fn code_taken(
    pool: &PgPool,
    code: &str,
    exclude: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(
            SELECT 1 FROM mail_templates
            WHERE code = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR id <> $2)
         )",
    )
    .bind(code)
    .bind(exclude)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn create(pool: &PgPool, new: &NewTemplate) -> Result<MailTemplate, sqlx::Error> {
    sqlx::query_as::<_, MailTemplate>(
        "INSERT INTO mail_templates (id, code, name, description, subject, body, variables,
             trigger_event, is_active)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&new.code)
    .bind(Json(&new.name))
    .bind(Json(&new.description))
    .bind(Json(&new.subject))
    .bind(Json(&new.body))
    .bind(&new.variables)
    .bind(new.trigger_event.as_deref())
    .bind(new.is_active)
    .fetch_one(pool)
    .await
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    patch: &TemplatePatch,
) -> Result<MailTemplate, sqlx::Error> {
    sqlx::query_as::<_, MailTemplate>(
        "UPDATE mail_templates SET
           code = COALESCE($2, code),
           name = COALESCE($3, name),
           description = COALESCE($4, description),
           subject = COALESCE($5, subject),
           body = COALESCE($6, body),
           variables = COALESCE($7, variables),
           trigger_event = COALESCE($8, trigger_event),
           is_active = COALESCE($9, is_active),
           updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL
         RETURNING *",
    )
    .bind(id)
    .bind(patch.code.as_deref())
    .bind(patch.name.as_ref().map(Json))
    .bind(patch.description.as_ref().map(Json))
    .bind(patch.subject.as_ref().map(Json))
    .bind(patch.body.as_ref().map(Json))
    .bind(patch.variables.as_ref())
    .bind(patch.trigger_event.as_deref())
    .bind(patch.is_active)
    .fetch_one(pool)
    .await
}

pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE mail_templates SET deleted_at = now(), updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
