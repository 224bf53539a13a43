use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::extractor::AdminUser;
use crate::db;
use crate::error::AppError;
use crate::models::AuditEvent;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct AuditParams {
    pub resource_type: String,
    pub resource_id: Uuid,
}

/// Audit trail of one configuration, template or history row, newest first.
pub async fn list(
    _admin: AdminUser,
    State(state): State<SharedState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    let events =
        db::audit::list_for_resource(&state.pool, &params.resource_type, params.resource_id).await?;
    Ok(Json(events))
}
