use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use mailroom::auth::jwt::{self, ROLE_ADMIN, ROLE_SERVICE};
use mailroom::config::{Config, TransportMode};
use mailroom::mail::transport::MailProfile;
use mailroom::mail::{MailTransport, OutgoingEmail, TransportError, TransportFactory};
use mailroom::state::SharedState;

const JWT_SECRET: &str = "test-jwt-secret-that-is-long-enough";

/// Counters and scripted failures shared by every transport the stub factory builds.
#[derive(Default)]
pub struct StubOutbox {
    pub builds: AtomicUsize,
    pub verifies: AtomicUsize,
    pub sends: AtomicUsize,
    /// Number of upcoming `send` calls that fail before sends start succeeding.
    pub failing_sends: AtomicUsize,
    /// Number of upcoming connection checks that fail.
    pub failing_verifies: AtomicUsize,
    /// When set, every `send` fails.
    pub always_fail: std::sync::atomic::AtomicBool,
    /// Sends through a transport built with this password are refused.
    pub revoked_password: Mutex<Option<String>>,
    /// Password of every transport built, in build order.
    pub built_with: Mutex<Vec<String>>,
    pub delivered: Mutex<Vec<OutgoingEmail>>,
}

impl StubOutbox {
    pub fn fail_next(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_verifies(&self, n: usize) {
        self.failing_verifies.store(n, Ordering::SeqCst);
    }

    pub fn revoke_password(&self, password: &str) {
        *self.revoked_password.lock().unwrap() = Some(password.to_string());
    }

    pub fn built_with(&self) -> Vec<String> {
        self.built_with.lock().unwrap().clone()
    }

    pub fn verifies(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }

    pub fn fail_always(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<OutgoingEmail> {
        self.delivered.lock().unwrap().clone()
    }
}

struct StubFactory {
    outbox: Arc<StubOutbox>,
}

impl TransportFactory for StubFactory {
    fn build(&self, profile: &MailProfile) -> Result<Arc<dyn MailTransport>, TransportError> {
        self.outbox.builds.fetch_add(1, Ordering::SeqCst);
        self.outbox
            .built_with
            .lock()
            .unwrap()
            .push(profile.password.clone());
        Ok(Arc::new(StubTransport {
            outbox: self.outbox.clone(),
            password: profile.password.clone(),
        }))
    }
}

struct StubTransport {
    outbox: Arc<StubOutbox>,
    password: String,
}

#[async_trait]
impl MailTransport for StubTransport {
    async fn verify(&self) -> Result<(), TransportError> {
        self.outbox.verifies.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .outbox
            .failing_verifies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if scripted.is_ok() {
            return Err(TransportError::Verify("connection reset by peer".to_string()));
        }
        Ok(())
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        self.outbox.sends.fetch_add(1, Ordering::SeqCst);

        if self.outbox.revoked_password.lock().unwrap().as_deref() == Some(self.password.as_str()) {
            return Err(TransportError::Send("535 authentication failed".to_string()));
        }
        if self.outbox.always_fail.load(Ordering::SeqCst) {
            return Err(TransportError::Send("connection refused".to_string()));
        }
        let scripted = self
            .outbox
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if scripted.is_ok() {
            return Err(TransportError::Send("451 try again later".to_string()));
        }

        self.outbox.delivered.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// A running test server instance with a dedicated test database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: PgPool,
    pub client: Client,
    pub db_name: String,
    pub state: SharedState,
    pub outbox: Arc<StubOutbox>,
    pub admin_token: String,
    pub service_token: String,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Create a configuration, return its JSON.
    pub async fn create_config(&self, body: Value) -> Value {
        let (resp, status) = self
            .post_auth("/api/v1/mail/configs", &self.admin_token, &body)
            .await;
        assert_eq!(status, StatusCode::OK, "create config failed: {resp}");
        resp
    }

    /// Create a configuration with defaults suitable for fast retries.
    pub async fn create_default_config(&self, max_retries: i32) -> Value {
        self.create_config(json!({
            "name": "Primary",
            "host": "smtp.example.com",
            "port": 587,
            "username": "mailer",
            "password": "hunter2",
            "from_address": "noreply@example.com",
            "from_name": "Marketplace",
            "is_default": true,
            "max_retries": max_retries,
            "retry_delay_seconds": 1
        }))
        .await
    }

    /// Create a template, return its JSON.
    pub async fn create_template(&self, code: &str, subject: &str, body: &str) -> Value {
        let (resp, status) = self
            .post_auth(
                "/api/v1/mail/templates",
                &self.admin_token,
                &json!({
                    "code": code,
                    "name": { "en": code },
                    "subject": { "en": subject },
                    "body": { "en": body }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "create template failed: {resp}");
        resp
    }

    /// Poll a history row until it reaches SENT or FAILED.
    pub async fn wait_for_terminal(&self, history_id: &str, timeout: Duration) -> Value {
        self.wait_for_status(history_id, &["SENT", "FAILED"], timeout).await
    }

    /// Poll a history row until its status is one of `statuses`.
    pub async fn wait_for_status(&self, history_id: &str, statuses: &[&str], timeout: Duration) -> Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (row, status) = self
                .get_auth(&format!("/api/v1/mail/history/{history_id}"), &self.admin_token)
                .await;
            assert_eq!(status, StatusCode::OK, "history lookup failed: {row}");
            if row["status"].as_str().is_some_and(|s| statuses.contains(&s)) {
                return row;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "history {history_id} still {} after {timeout:?}",
                row["status"]
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Make an authenticated GET request.
    pub async fn get_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated POST request with JSON body.
    pub async fn post_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated PUT request with JSON body.
    pub async fn put_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .put(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("put request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated DELETE request.
    pub async fn delete_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

fn database_url(base_url: &str, db_name: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.to_string())
}

/// Spawn a test app with a fresh temporary database and a stub transport.
pub async fn spawn_app() -> TestApp {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let db_name = format!("mailroom_test_{}", Uuid::now_v7().to_string().replace('-', ""));

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url(&base_url, "postgres"))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = database_url(&base_url, &db_name);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    let config = Config {
        database_url: test_url,
        jwt_secret: JWT_SECRET.to_string(),
        encryption_key: "test-encryption-key-32-chars-ok!".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        log_level: "warn".to_string(),
        max_body_size: 1_048_576,
        transport: TransportMode::Log,
        smtp_pool_size: 1,
        smtp_timeout: Duration::from_secs(5),
    };

    let outbox = Arc::new(StubOutbox::default());
    let factory = Arc::new(StubFactory {
        outbox: outbox.clone(),
    });
    let (app, state) = mailroom::build_app(pool.clone(), config, factory);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    let ttl = chrono::Duration::hours(1);
    let admin_token = jwt::create_token(Uuid::now_v7(), ROLE_ADMIN, ttl, JWT_SECRET).unwrap();
    let service_token = jwt::create_token(Uuid::now_v7(), ROLE_SERVICE, ttl, JWT_SECRET).unwrap();

    TestApp {
        addr,
        pool,
        client: Client::new(),
        db_name,
        state,
        outbox,
        admin_token,
        service_token,
    }
}

/// Drop the test database after tests complete.
pub async fn cleanup(app: TestApp) {
    let db_name = app.db_name.clone();
    app.pool.close().await;

    let base_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url(&base_url, "postgres"))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}
