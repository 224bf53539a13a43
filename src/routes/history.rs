use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PageParams, Paged};
use crate::auth::extractor::AdminUser;
use crate::db;
use crate::db::mail_history::{DailyVolume, HistoryFilter, TemplateUsage};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{DeliveryStatus, MailHistory};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub to_email: Option<String>,
    pub template_id: Option<Uuid>,
    pub config_id: Option<Uuid>,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct ResendRequest {
    pub config_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct StatisticsParams {
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct Statistics {
    pub days: i64,
    pub since: DateTime<Utc>,
    pub total: i64,
    pub by_status: BTreeMap<DeliveryStatus, i64>,
    pub daily: Vec<DailyVolume>,
    pub top_templates: Vec<TemplateUsage>,
}

pub async fn list(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Paged<MailHistory>>, AppError> {
    let (page, per_page, offset) = PageParams {
        page: params.page,
        per_page: params.per_page,
    }
    .resolve();

    let status = params
        .status
        .as_deref()
        .map(str::parse::<DeliveryStatus>)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let filter = HistoryFilter {
        status,
        to_email: params.to_email.filter(|s| !s.trim().is_empty()),
        template_id: params.template_id,
        config_id: params.config_id,
        related_type: params.related_type,
        related_id: params.related_id,
        from: params.from,
        to: params.to,
    };

    let rows = db::mail_history::list(&state.pool, &filter, per_page, offset).await?;
    let total = db::mail_history::count(&state.pool, &filter).await?;
    Ok(Json(Paged::new(rows, total, page, per_page)))
}

pub async fn get(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MailHistory>, AppError> {
    let row = db::mail_history::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("History record not found".to_string()))?;
    Ok(Json(row))
}

pub async fn delete(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !db::mail_history::soft_delete(&state.pool, id).await? {
        return Err(AppError::NotFound("History record not found".to_string()));
    }

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_history.deleted",
        "mail_history",
        Some(id),
        None,
    )
    .await;

    Ok(Json(serde_json::json!({ "message": "Deleted" })))
}

pub async fn resend(
    AdminUser(admin): AdminUser,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResendRequest>>,
) -> Result<Json<MailHistory>, AppError> {
    let config_id = body.and_then(|Json(req)| req.config_id);
    let row = state.mailer.resend(id, config_id).await?;

    audit::log_event(
        &state.pool,
        Some(admin.user_id),
        "mail_history.resent",
        "mail_history",
        Some(row.id),
        Some(serde_json::json!({ "resent_from": id })),
    )
    .await;

    Ok(Json(row))
}

pub async fn statistics(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Query(params): Query<StatisticsParams>,
) -> Result<Json<Statistics>, AppError> {
    let days = params.days.unwrap_or(7).clamp(1, 365);
    let since = Utc::now() - Duration::days(days);

    let mut by_status: BTreeMap<DeliveryStatus, i64> =
        DeliveryStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for row in db::mail_history::status_counts(&state.pool, since).await? {
        by_status.insert(row.status, row.count);
    }

    let daily = db::mail_history::daily_volume(&state.pool, since).await?;
    let top_templates = db::mail_history::top_templates(&state.pool, since, 10).await?;

    Ok(Json(Statistics {
        days,
        since,
        total: by_status.values().sum(),
        by_status,
        daily,
        top_templates,
    }))
}
