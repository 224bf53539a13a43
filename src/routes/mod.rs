pub mod audit;
pub mod configs;
pub mod history;
pub mod send;
pub mod templates;

use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Configurations
        .route("/api/v1/mail/configs", get(configs::list).post(configs::create))
        .route(
            "/api/v1/mail/configs/{id}",
            get(configs::get)
                .put(configs::update)
                .delete(configs::delete),
        )
        .route("/api/v1/mail/configs/{id}/test", post(configs::test))
        // Templates
        .route("/api/v1/mail/templates", get(templates::list).post(templates::create))
        .route(
            "/api/v1/mail/templates/{id}",
            get(templates::get)
                .put(templates::update)
                .delete(templates::delete),
        )
        .route("/api/v1/mail/templates/{id}/preview", post(templates::preview))
        // History
        .route("/api/v1/mail/history", get(history::list))
        .route("/api/v1/mail/history/statistics", get(history::statistics))
        .route(
            "/api/v1/mail/history/{id}",
            get(history::get).delete(history::delete),
        )
        .route("/api/v1/mail/history/{id}/resend", post(history::resend))
        // Sending
        .route("/api/v1/mail/send", post(send::send))
        // Audit
        .route("/api/v1/mail/audit", get(audit::list))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageParams {
    /// `(page, per_page, offset)` with page >= 1 and per_page clamped to 1..=100.
    pub fn resolve(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        (page, per_page, (page - 1) * per_page)
    }
}

#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        Self {
            items,
            total,
            page,
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }
}
