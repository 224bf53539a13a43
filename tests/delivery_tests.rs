mod common;

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(10);

async fn send(app: &common::TestApp, body: Value) -> (Value, StatusCode) {
    app.post_auth("/api/v1/mail/send", &app.service_token, &body).await
}

// ── Sending ─────────────────────────────────────────────────────

#[tokio::test]
async fn send_returns_pending_row_then_delivers() {
    let app = common::spawn_app().await;
    app.create_default_config(3).await;
    let template = app
        .create_template(
            "order.confirmed",
            "Order {{orderId}} confirmed",
            "<p>Hi {{name}}, order {{orderId}} is confirmed.</p>",
        )
        .await;

    let (row, status) = send(
        &app,
        json!({
            "template_id": template["id"],
            "to_email": "buyer@example.com",
            "to_name": "Buyer",
            "variables": { "orderId": "X1", "name": "Ana" },
            "related_type": "order",
            "related_id": "X1"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "send failed: {row}");
    assert_eq!(row["status"], "PENDING");
    assert_eq!(row["attempts"], 0);
    assert_eq!(row["subject"], "Order X1 confirmed");

    let done = app
        .wait_for_terminal(row["id"].as_str().unwrap(), WAIT)
        .await;
    assert_eq!(done["status"], "SENT");
    assert_eq!(done["attempts"], 1);
    assert!(done["sent_at"].is_string());
    assert!(done["error_message"].is_null());

    let delivered = app.outbox.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].from, "Marketplace <noreply@example.com>");
    assert_eq!(delivered[0].body, "<p>Hi Ana, order X1 is confirmed.</p>");

    common::cleanup(app).await;
}

#[tokio::test]
async fn failed_send_is_retried_until_exhausted() {
    let app = common::spawn_app().await;
    app.create_default_config(2).await;
    app.outbox.fail_always();

    let (row, status) = send(
        &app,
        json!({
            "to_email": "buyer@example.com",
            "subject": "Ping",
            "body": "<p>Ping</p>"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "send failed: {row}");

    let done = app
        .wait_for_terminal(row["id"].as_str().unwrap(), WAIT)
        .await;
    assert_eq!(done["status"], "FAILED");
    assert_eq!(done["attempts"], 3);
    assert!(done["error_message"].as_str().unwrap().contains("connection refused"));

    // Nothing is scheduled after the terminal state.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(app.outbox.sends(), 3);

    common::cleanup(app).await;
}

#[tokio::test]
async fn retry_stops_at_first_success() {
    let app = common::spawn_app().await;
    app.create_default_config(3).await;
    app.outbox.fail_next(1);

    let (row, _) = send(
        &app,
        json!({
            "to_email": "buyer@example.com",
            "subject": "Ping",
            "body": "<p>Ping</p>"
        }),
    )
    .await;

    let done = app
        .wait_for_terminal(row["id"].as_str().unwrap(), WAIT)
        .await;
    assert_eq!(done["status"], "SENT");
    assert_eq!(done["attempts"], 2);
    assert!(done["error_message"].is_null());
    assert_eq!(app.outbox.sends(), 2);

    common::cleanup(app).await;
}

#[tokio::test]
async fn no_retries_fails_after_one_attempt() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;
    app.outbox.fail_always();
    let template = app
        .create_template("order.confirmed", "Order {{orderId}} confirmed", "Order {{orderId}} confirmed")
        .await;

    let (row, _) = send(
        &app,
        json!({
            "template_id": template["id"],
            "to_email": "buyer@example.com",
            "variables": { "orderId": "X1" }
        }),
    )
    .await;
    assert_eq!(row["status"], "PENDING");

    let done = app
        .wait_for_terminal(row["id"].as_str().unwrap(), WAIT)
        .await;
    assert_eq!(done["status"], "FAILED");
    assert_eq!(done["attempts"], 1);
    assert_eq!(done["body"], "Order X1 confirmed");

    common::cleanup(app).await;
}

#[tokio::test]
async fn raw_content_substitutes_numbers() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;

    let (row, status) = send(
        &app,
        json!({
            "to_email": "buyer@example.com",
            "subject": "Quote {{quoteId}}",
            "body": "Total {{total}} for {{missing}}",
            "variables": { "quoteId": 42, "total": 9.5 }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["subject"], "Quote 42");
    assert_eq!(row["body"], "Total 9.5 for {{missing}}");

    common::cleanup(app).await;
}

#[tokio::test]
async fn send_without_default_config_is_not_found() {
    let app = common::spawn_app().await;

    let (body, status) = send(
        &app,
        json!({
            "to_email": "buyer@example.com",
            "subject": "Ping",
            "body": "Ping"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "unexpected: {body}");

    let (_, status) = send(
        &app,
        json!({
            "config_id": uuid::Uuid::now_v7(),
            "to_email": "buyer@example.com",
            "subject": "Ping",
            "body": "Ping"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    common::cleanup(app).await;
}

#[tokio::test]
async fn send_validates_content_and_recipients() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;

    let (_, status) = send(&app, json!({ "to_email": "buyer@example.com", "subject": "Ping" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = send(
        &app,
        json!({ "to_email": "not an address", "subject": "Ping", "body": "Ping" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mail_history")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    common::cleanup(app).await;
}

#[tokio::test]
async fn inactive_template_is_rejected() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;
    let template = app.create_template("paused", "Paused", "Paused").await;
    let id = template["id"].as_str().unwrap();
    app.put_auth(
        &format!("/api/v1/mail/templates/{id}"),
        &app.admin_token,
        &json!({ "is_active": false }),
    )
    .await;

    let (_, status) = send(&app, json!({ "template_id": id, "to_email": "buyer@example.com" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = send(
        &app,
        json!({ "template_id": uuid::Uuid::now_v7(), "to_email": "buyer@example.com" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    common::cleanup(app).await;
}

#[tokio::test]
async fn send_by_trigger_event() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;
    let (template, status) = app
        .post_auth(
            "/api/v1/mail/templates",
            &app.admin_token,
            &json!({
                "code": "inquiry.received",
                "name": { "en": "Inquiry received" },
                "subject": { "en": "New inquiry from {{company}}" },
                "body": { "en": "<p>{{company}} sent an inquiry.</p>" },
                "trigger_event": "inquiry.created"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (row, status) = send(
        &app,
        json!({
            "trigger_event": "inquiry.created",
            "to_email": "seller@example.com",
            "variables": { "company": "Acme" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "send failed: {row}");
    assert_eq!(row["template_id"], template["id"]);
    assert_eq!(row["subject"], "New inquiry from Acme");

    let (_, status) = send(
        &app,
        json!({ "trigger_event": "unknown.event", "to_email": "seller@example.com" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    common::cleanup(app).await;
}

// ── Resend ──────────────────────────────────────────────────────

#[tokio::test]
async fn resend_creates_independent_row() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;
    app.outbox.fail_always();

    let (row, _) = send(
        &app,
        json!({
            "to_email": "buyer@example.com",
            "subject": "Invoice {{n}}",
            "body": "<p>Invoice {{n}}</p>",
            "variables": { "n": "7" }
        }),
    )
    .await;
    let source_id = row["id"].as_str().unwrap().to_string();
    let failed = app.wait_for_terminal(&source_id, WAIT).await;
    assert_eq!(failed["status"], "FAILED");

    app.outbox.always_fail.store(false, std::sync::atomic::Ordering::SeqCst);
    let (resent, status) = app
        .post_auth(
            &format!("/api/v1/mail/history/{source_id}/resend"),
            &app.admin_token,
            &json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "resend failed: {resent}");
    assert_ne!(resent["id"], failed["id"]);
    assert_eq!(resent["attempts"], 0);
    assert_eq!(resent["status"], "PENDING");
    assert_eq!(resent["subject"], "Invoice 7");
    assert_eq!(resent["body"], "<p>Invoice 7</p>");
    assert_eq!(resent["resent_from"], source_id.as_str());

    let done = app
        .wait_for_terminal(resent["id"].as_str().unwrap(), WAIT)
        .await;
    assert_eq!(done["status"], "SENT");

    let (source, _) = app
        .get_auth(&format!("/api/v1/mail/history/{source_id}"), &app.admin_token)
        .await;
    assert_eq!(source["status"], "FAILED");
    assert_eq!(source["attempts"], 1);
    assert_eq!(source["updated_at"], failed["updated_at"]);

    common::cleanup(app).await;
}

// ── Transporter cache ───────────────────────────────────────────

#[tokio::test]
async fn transport_is_reused_until_config_changes() {
    let app = common::spawn_app().await;
    let config = app.create_default_config(0).await;
    let id = config["id"].as_str().unwrap();

    for _ in 0..2 {
        let (row, _) = send(
            &app,
            json!({ "to_email": "buyer@example.com", "subject": "Ping", "body": "Ping" }),
        )
        .await;
        app.wait_for_terminal(row["id"].as_str().unwrap(), WAIT).await;
    }
    assert_eq!(app.outbox.builds(), 1);

    let (_, status) = app
        .put_auth(
            &format!("/api/v1/mail/configs/{id}"),
            &app.admin_token,
            &json!({ "host": "smtp-new.example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.mailer.transports().is_empty());

    let (row, _) = send(
        &app,
        json!({ "to_email": "buyer@example.com", "subject": "Ping", "body": "Ping" }),
    )
    .await;
    let done = app.wait_for_terminal(row["id"].as_str().unwrap(), WAIT).await;
    assert_eq!(done["status"], "SENT");
    assert_eq!(app.outbox.builds(), 2);

    common::cleanup(app).await;
}

// ── History queries ─────────────────────────────────────────────

#[tokio::test]
async fn history_filters_and_statistics() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;

    for (to, related) in [("a@example.com", "A"), ("b@example.com", "B")] {
        let (row, _) = send(
            &app,
            json!({
                "to_email": to,
                "subject": "Ping",
                "body": "Ping",
                "related_type": "order",
                "related_id": related
            }),
        )
        .await;
        app.wait_for_terminal(row["id"].as_str().unwrap(), WAIT).await;
    }

    let (page, status) = app
        .get_auth(
            "/api/v1/mail/history?related_type=order&related_id=B",
            &app.admin_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["to_email"], "b@example.com");

    let (page, _) = app
        .get_auth("/api/v1/mail/history?status=SENT", &app.admin_token)
        .await;
    assert_eq!(page["total"], 2);

    let (stats, _) = app
        .get_auth("/api/v1/mail/history/statistics", &app.admin_token)
        .await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["by_status"]["SENT"], 2);
    assert_eq!(stats["by_status"]["FAILED"], 0);

    common::cleanup(app).await;
}

#[tokio::test]
async fn deleted_history_disappears_from_listing() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;

    let (row, _) = send(
        &app,
        json!({ "to_email": "buyer@example.com", "subject": "Ping", "body": "Ping" }),
    )
    .await;
    let id = row["id"].as_str().unwrap();
    app.wait_for_terminal(id, WAIT).await;

    let (_, status) = app
        .delete_auth(&format!("/api/v1/mail/history/{id}"), &app.admin_token)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (page, _) = app.get_auth("/api/v1/mail/history", &app.admin_token).await;
    assert_eq!(page["total"], 0);

    common::cleanup(app).await;
}

// ── Connection checks and credential changes ────────────────────

#[tokio::test]
async fn failed_connection_check_counts_as_an_attempt() {
    let app = common::spawn_app().await;
    app.create_default_config(1).await;
    app.outbox.fail_next_verifies(1);

    let (row, _) = send(
        &app,
        json!({ "to_email": "buyer@example.com", "subject": "Ping", "body": "Ping" }),
    )
    .await;
    let id = row["id"].as_str().unwrap();

    let retrying = app.wait_for_status(id, &["RETRY"], WAIT).await;
    assert_eq!(retrying["attempts"], 1);
    assert!(retrying["error_message"]
        .as_str()
        .unwrap()
        .contains("connection check failed"));

    let done = app.wait_for_terminal(id, WAIT).await;
    assert_eq!(done["status"], "SENT");
    assert_eq!(done["attempts"], 2);
    assert!(done["error_message"].is_null());

    // The failed handshake built a transport that was never cached or used.
    assert_eq!(app.outbox.builds(), 2);
    assert_eq!(app.outbox.verifies(), 2);
    assert_eq!(app.outbox.sends(), 1);

    common::cleanup(app).await;
}

#[tokio::test]
async fn retry_after_config_update_uses_new_credentials() {
    let app = common::spawn_app().await;
    let config = app.create_default_config(3).await;
    let config_id = config["id"].as_str().unwrap();
    app.outbox.revoke_password("hunter2");

    let (row, _) = send(
        &app,
        json!({ "to_email": "buyer@example.com", "subject": "Ping", "body": "Ping" }),
    )
    .await;
    let id = row["id"].as_str().unwrap();

    let retrying = app.wait_for_status(id, &["RETRY"], WAIT).await;
    assert!(retrying["error_message"].as_str().unwrap().contains("535"));

    let (_, status) = app
        .put_auth(
            &format!("/api/v1/mail/configs/{config_id}"),
            &app.admin_token,
            &json!({ "password": "rotated-secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let done = app.wait_for_terminal(id, WAIT).await;
    assert_eq!(done["status"], "SENT");
    assert_eq!(done["attempts"], 2);

    let (fresh, _) = send(
        &app,
        json!({ "to_email": "buyer@example.com", "subject": "Pong", "body": "Pong" }),
    )
    .await;
    let fresh = app.wait_for_terminal(fresh["id"].as_str().unwrap(), WAIT).await;
    assert_eq!(fresh["status"], "SENT");
    assert_eq!(fresh["attempts"], 1);

    assert_eq!(
        app.outbox.built_with(),
        vec!["hunter2".to_string(), "rotated-secret".to_string()]
    );

    common::cleanup(app).await;
}

#[tokio::test]
async fn retry_fails_when_config_is_deactivated() {
    let app = common::spawn_app().await;
    let config = app.create_default_config(3).await;
    let config_id = config["id"].as_str().unwrap();
    app.outbox.fail_next(1);

    let (row, _) = send(
        &app,
        json!({ "to_email": "buyer@example.com", "subject": "Ping", "body": "Ping" }),
    )
    .await;
    let id = row["id"].as_str().unwrap();
    app.wait_for_status(id, &["RETRY"], WAIT).await;

    app.put_auth(
        &format!("/api/v1/mail/configs/{config_id}"),
        &app.admin_token,
        &json!({ "is_active": false }),
    )
    .await;

    let done = app.wait_for_terminal(id, WAIT).await;
    assert_eq!(done["status"], "FAILED");
    assert_eq!(done["attempts"], 2);
    assert!(done["error_message"].as_str().unwrap().contains("no longer active"));
    assert_eq!(app.outbox.sends(), 1);

    common::cleanup(app).await;
}

#[tokio::test]
async fn recipient_filter_treats_wildcards_literally() {
    let app = common::spawn_app().await;
    app.create_default_config(0).await;

    for to in ["a_b@example.com", "axb@example.com", "c%d@example.com"] {
        let (row, status) = send(&app, json!({ "to_email": to, "subject": "Ping", "body": "Ping" })).await;
        assert_eq!(status, StatusCode::OK, "send to {to} failed: {row}");
    }

    let (page, status) = app
        .get_auth("/api/v1/mail/history?to_email=a_b", &app.admin_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["to_email"], "a_b@example.com");

    let (page, _) = app
        .get_auth("/api/v1/mail/history?to_email=c%25d", &app.admin_token)
        .await;
    assert_eq!(page["total"], 1);

    let (page, _) = app
        .get_auth("/api/v1/mail/history?to_email=%25", &app.admin_token)
        .await;
    assert_eq!(page["total"], 1);

    common::cleanup(app).await;
}
