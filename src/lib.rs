pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use sqlx::PgPool;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, TransportMode};
use crate::mail::transport::{LogTransportFactory, SmtpTransportFactory};
use crate::mail::{Mailer, TransportFactory, TransporterCache};
use crate::state::{AppState, SharedState};

/// The transport factory selected by configuration.
pub fn transport_factory(config: &Config) -> Arc<dyn TransportFactory> {
    match config.transport {
        TransportMode::Smtp => {
            Arc::new(SmtpTransportFactory::new(config.smtp_pool_size, config.smtp_timeout))
        }
        TransportMode::Log => {
            tracing::warn!("Log transport enabled: emails will be logged, not delivered");
            Arc::new(LogTransportFactory)
        }
    }
}

pub fn build_app(
    pool: PgPool,
    config: Config,
    transports: Arc<dyn TransportFactory>,
) -> (Router, SharedState) {
    let mailer = Arc::new(Mailer::new(
        pool.clone(),
        config.encryption_key.clone(),
        TransporterCache::new(transports),
    ));

    let max_body_size = config.max_body_size;
    let state: SharedState = Arc::new(AppState {
        pool,
        config,
        mailer,
    });

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state.clone());

    (app, state)
}

async fn health() -> &'static str {
    "ok"
}
