use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{PageParams, Paged};
use crate::auth::extractor::AdminUser;
use crate::crypto;
use crate::db;
use crate::db::mail_configs::{ConfigPatch, NewConfig};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::mail_config::MASKED_SECRET;
use crate::models::{MailConfig, TlsMode};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CreateConfig {
    pub name: String,
    pub host: String,
    pub port: i32,
    pub tls_mode: Option<TlsMode>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    pub max_retries: Option<i32>,
    pub retry_delay_seconds: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateConfig {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub tls_mode: Option<TlsMode>,
    pub username: Option<String>,
    /// Blank or the mask value keeps the stored password.
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    pub max_retries: Option<i32>,
    pub retry_delay_seconds: Option<i32>,
}

#[derive(Deserialize)]
pub struct TestConfig {
    pub to: String,
}

fn encrypt_password(state: &SharedState, password: Option<&str>) -> Result<Option<Vec<u8>>, AppError> {
    match password.map(str::trim) {
        Some(p) if !p.is_empty() && p != MASKED_SECRET => crypto::encrypt(p, &state.config.encryption_key)
            .map(Some)
            .map_err(AppError::Internal),
        _ => Ok(None),
    }
}

fn check_from_address(address: &str) -> Result<(), AppError> {
    address
        .parse::<lettre::Address>()
        .map(|_| ())
        .map_err(|e| AppError::BadRequest(format!("Invalid from_address: {e}")))
}

pub async fn list(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<MailConfig>>, AppError> {
    let (page, per_page, offset) = params.resolve();
    let configs = db::mail_configs::list(&state.pool, per_page, offset).await?;
    let total = db::mail_configs::count(&state.pool).await?;
    Ok(Json(Paged::new(configs, total, page, per_page)))
}

pub async fn get(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MailConfig>, AppError> {
    let config = db::mail_configs::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Mail configuration not found".to_string()))?;
    Ok(Json(config))
}

pub async fn create(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Json(req): Json<CreateConfig>,
) -> Result<Json<MailConfig>, AppError> {
    if req.name.trim().is_empty() || req.host.trim().is_empty() {
        return Err(AppError::BadRequest("name and host are required".to_string()));
    }
    check_from_address(&req.from_address)?;

    let new = NewConfig {
        name: req.name.trim().to_string(),
        host: req.host.trim().to_string(),
        port: req.port,
        tls_mode: req.tls_mode.unwrap_or_default(),
        username: req.username.unwrap_or_default(),
        password_enc: encrypt_password(&state, req.password.as_deref())?,
        from_address: req.from_address,
        from_name: req.from_name,
        is_default: req.is_default.unwrap_or(false),
        is_active: req.is_active.unwrap_or(true),
        max_retries: req.max_retries.unwrap_or(3),
        retry_delay_seconds: req.retry_delay_seconds.unwrap_or(60),
    };

    let config = state.mailer.create_config(&new).await?;

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_config.created",
        "mail_config",
        Some(config.id),
        Some(serde_json::json!({ "is_default": config.is_default })),
    )
    .await;

    Ok(Json(config))
}

pub async fn update(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateConfig>,
) -> Result<Json<MailConfig>, AppError> {
    if let Some(address) = &req.from_address {
        check_from_address(address)?;
    }

    let patch = ConfigPatch {
        password_enc: encrypt_password(&state, req.password.as_deref())?,
        name: req.name,
        host: req.host,
        port: req.port,
        tls_mode: req.tls_mode,
        username: req.username,
        from_address: req.from_address,
        from_name: req.from_name,
        is_default: req.is_default,
        is_active: req.is_active,
        max_retries: req.max_retries,
        retry_delay_seconds: req.retry_delay_seconds,
    };

    let config = state.mailer.update_config(id, &patch).await?;

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_config.updated",
        "mail_config",
        Some(config.id),
        None,
    )
    .await;

    Ok(Json(config))
}

pub async fn delete(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.mailer.delete_config(id).await?;

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_config.deleted",
        "mail_config",
        Some(id),
        None,
    )
    .await;

    Ok(Json(serde_json::json!({ "message": "Deleted" })))
}

pub async fn test(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TestConfig>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.mailer.test_config(id, req.to.trim()).await?;
    Ok(Json(serde_json::json!({ "message": "Test email sent successfully" })))
}
