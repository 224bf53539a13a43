use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{PageParams, Paged};
use crate::auth::extractor::AdminUser;
use crate::db;
use crate::db::mail_templates::{NewTemplate, TemplatePatch};
use crate::error::AppError;
use crate::mail::engine::RenderedContent;
use crate::mail::render::placeholders;
use crate::middleware::audit;
use crate::models::{Language, LocalizedText, MailTemplate, Variables};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub trigger_event: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTemplate {
    pub code: String,
    pub name: LocalizedText,
    pub description: Option<LocalizedText>,
    pub subject: LocalizedText,
    pub body: LocalizedText,
    /// Defaults to the placeholders found in the default-language subject and body.
    pub variables: Option<Vec<String>>,
    pub trigger_event: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateTemplate {
    pub code: Option<String>,
    pub name: Option<LocalizedText>,
    pub description: Option<LocalizedText>,
    pub subject: Option<LocalizedText>,
    pub body: Option<LocalizedText>,
    pub variables: Option<Vec<String>>,
    pub trigger_event: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub language: Language,
}

fn validate_code(code: &str) -> Result<(), AppError> {
    if code.is_empty() || code.len() > 100 {
        return Err(AppError::BadRequest("code must be 1-100 characters".to_string()));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AppError::BadRequest(
            "code may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }
    Ok(())
}

fn require_text(field: &str, text: &LocalizedText) -> Result<(), AppError> {
    if text.is_blank() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

pub async fn list(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Paged<MailTemplate>>, AppError> {
    let (page, per_page, offset) = PageParams {
        page: params.page,
        per_page: params.per_page,
    }
    .resolve();
    let list_params = db::mail_templates::ListParams {
        limit: per_page,
        offset,
        search: params.search.filter(|s| !s.trim().is_empty()),
        is_active: params.is_active,
        trigger_event: params.trigger_event,
    };

    let templates = db::mail_templates::list(&state.pool, &list_params).await?;
    let total = db::mail_templates::count(&state.pool, &list_params).await?;
    Ok(Json(Paged::new(templates, total, page, per_page)))
}

pub async fn get(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MailTemplate>, AppError> {
    let template = db::mail_templates::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Template not found".to_string()))?;
    Ok(Json(template))
}

pub async fn create(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Json(req): Json<CreateTemplate>,
) -> Result<Json<MailTemplate>, AppError> {
    let code = req.code.trim().to_string();
    validate_code(&code)?;
    require_text("name", &req.name)?;
    require_text("subject", &req.subject)?;
    require_text("body", &req.body)?;

    if db::mail_templates::code_taken(&state.pool, &code, None).await? {
        return Err(AppError::Conflict(format!("Template code '{code}' already exists")));
    }

    let variables = req.variables.unwrap_or_else(|| {
        let mut keys = placeholders(&req.subject.en);
        for key in placeholders(&req.body.en) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    });

    let template = db::mail_templates::create(
        &state.pool,
        &NewTemplate {
            code,
            name: req.name,
            description: req.description.unwrap_or_default(),
            subject: req.subject,
            body: req.body,
            variables,
            trigger_event: req.trigger_event.filter(|s| !s.trim().is_empty()),
            is_active: req.is_active.unwrap_or(true),
        },
    )
    .await
    .map_err(|e| unique_violation_to_conflict(e, "Template code already exists"))?;

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_template.created",
        "mail_template",
        Some(template.id),
        Some(serde_json::json!({ "code": template.code })),
    )
    .await;

    Ok(Json(template))
}

pub async fn update(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTemplate>,
) -> Result<Json<MailTemplate>, AppError> {
    let code = req.code.map(|c| c.trim().to_string());
    if let Some(code) = &code {
        validate_code(code)?;
        if db::mail_templates::code_taken(&state.pool, code, Some(id)).await? {
            return Err(AppError::Conflict(format!("Template code '{code}' already exists")));
        }
    }
    for (field, text) in [("name", &req.name), ("subject", &req.subject), ("body", &req.body)] {
        if let Some(text) = text {
            require_text(field, text)?;
        }
    }

    let patch = TemplatePatch {
        code,
        name: req.name,
        description: req.description,
        subject: req.subject,
        body: req.body,
        variables: req.variables,
        trigger_event: req.trigger_event,
        is_active: req.is_active,
    };

    let template = db::mail_templates::update(&state.pool, id, &patch)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound("Template not found".to_string()),
            other => unique_violation_to_conflict(other, "Template code already exists"),
        })?;

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_template.updated",
        "mail_template",
        Some(template.id),
        None,
    )
    .await;

    Ok(Json(template))
}

pub async fn delete(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !db::mail_templates::soft_delete(&state.pool, id).await? {
        return Err(AppError::NotFound("Template not found".to_string()));
    }

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_template.deleted",
        "mail_template",
        Some(id),
        None,
    )
    .await;

    Ok(Json(serde_json::json!({ "message": "Deleted" })))
}

pub async fn preview(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<RenderedContent>, AppError> {
    let rendered = state
        .mailer
        .preview(id, &req.variables, req.language)
        .await?;
    Ok(Json(rendered))
}

/// The partial unique index on `code` backs up the pre-insert check under concurrent writes.
fn unique_violation_to_conflict(err: sqlx::Error, message: &str) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(message.to_string());
        }
    }
    AppError::Database(err)
}
