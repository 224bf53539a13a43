use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::auth::extractor::AuthUser;
use crate::error::AppError;
use crate::mail::SendRequest;
use crate::models::MailHistory;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct SendBody {
    #[serde(flatten)]
    pub request: SendRequest,
    /// Send with the active template registered for this event instead of `template_id`.
    pub trigger_event: Option<String>,
}

/// Accept an email for delivery. The response is the `PENDING` history row;
/// poll `/api/v1/mail/history/{id}` for the outcome.
pub async fn send(
    auth: AuthUser,
    State(state): State<SharedState>,
    Json(body): Json<SendBody>,
) -> Result<Json<MailHistory>, AppError> {
    tracing::debug!(caller = %auth.user_id, to = %body.request.to_email, "Send requested");

    let history = match body.trigger_event.filter(|e| !e.trim().is_empty()) {
        Some(event) => state.mailer.send_event(&event, body.request).await?,
        None => state.mailer.send(body.request).await?,
    };

    Ok(Json(history))
}
