// tests/api_http.rs
mod common;

use axum::http::{Method, StatusCode};
use osint_pipeline::collect::RawItem;
use osint_pipeline::config::AppConfig;
use osint_pipeline::notify::NotifierMux;
use osint_pipeline::router;
use serde_json::json;

use common::{admin_token, login, send, state_with, test_state, ScriptedCollector, ADMIN_EMAIL};

#[tokio::test]
async fn health_uses_success_envelope() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let (status, headers, body) = send(&app, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert!(body.get("message").is_some_and(|m| m.is_null()));
    assert!(body["timestamp"].is_string());
    let rid = headers.get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(body["request_id"], rid);
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let req = axum::http::Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-abc-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    assert_eq!(resp.headers()["x-request-id"], "trace-abc-123");
}

#[tokio::test]
async fn unknown_route_gets_error_envelope() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let (status, _, body) = send(&app, Method::GET, "/api/v1/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let (status, _, body) = send(&app, Method::GET, "/api/v1/data-sources", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _, _) = send(&app, Method::GET, "/api/v1/data-sources", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_login_refresh_logout_flow() {
    let app = router(test_state(ScriptedCollector::default()).await);

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": "Ana@Example.test", "password": "Str0ng-pass!", "full_name": "Ana" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["user"]["role"], "viewer");
    assert_eq!(body["data"]["token_type"], "bearer");
    assert!(body["data"]["user"].get("password_hash").is_none());

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": "ana@example.test", "password": "Str0ng-pass!" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (access, refresh) = login(&app, "ana@example.test", "Str0ng-pass!").await;
    let (status, _, body) = send(&app, Method::GET, "/api/v1/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "ana@example.test");

    // A refresh token is not an access token.
    let (status, _, _) = send(&app, Method::GET, "/api/v1/auth/me", Some(&refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rotated = body["data"]["refresh_token"].as_str().unwrap().to_string();

    // The spent refresh token cannot be reused.
    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/logout",
        Some(&access),
        Some(json!({ "refresh_token": rotated })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": rotated })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn weak_password_and_bad_login_are_rejected() {
    let app = router(test_state(ScriptedCollector::default()).await);

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": "bob@example.test", "password": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["details"]["password"].is_array());

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": ADMIN_EMAIL, "password": "wrong-Passw0rd!" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn viewer_cannot_write_sources() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        None,
        Some(json!({ "email": "view@example.test", "password": "Str0ng-pass!" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["data"]["access_token"].as_str().unwrap().to_string();

    let (status, _, _) = send(&app, Method::GET, "/api/v1/data-sources", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/data-sources",
        Some(&token),
        Some(json!({ "name": "x", "kind": "web", "cadence_secs": 300, "endpoint": "https://x.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _, _) = send(&app, Method::GET, "/api/v1/reports/summary", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let mut cfg = AppConfig::for_tests();
    cfg.auth.rate_limit_per_minute = 2;
    let app = router(state_with(cfg, ScriptedCollector::default(), NotifierMux::empty()).await);
    let token = admin_token(&app).await;

    for _ in 0..2 {
        let (status, _, _) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert!(headers.contains_key("retry-after"));
}

#[tokio::test]
async fn data_source_crud_and_manual_collect() {
    let collector = ScriptedCollector::default();
    collector.set_items(vec![
        RawItem::new("Acme breach", "Attackers stolen data in a massive breach at Acme Corp"),
        RawItem::new("Acme growth", "Great quarter with record growth"),
    ]);
    let app = router(test_state(collector.clone()).await);
    let token = admin_token(&app).await;

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/data-sources",
        Some(&token),
        Some(json!({ "name": "Acme site", "kind": "web", "cadence_secs": 300, "endpoint": "https://acme.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "active");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/data-sources",
        Some(&token),
        Some(json!({ "name": "too fast", "kind": "web", "cadence_secs": 5, "endpoint": "https://x.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/data-sources",
        Some(&token),
        Some(json!({ "name": "glacial", "kind": "web", "cadence_secs": 10_000_000_000_000u64, "endpoint": "https://x.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/data-sources/{id}/collect"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["ingest"]["inserted"], 2);
    assert_eq!(body["data"]["analysis"]["analyzed"], 2);

    // Same content again: everything is a duplicate.
    let (_, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/data-sources/{id}/collect"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["ingest"]["duplicates"], 2);
    assert_eq!(body["data"]["ingest"]["inserted"], 0);

    let (status, _, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/records?source_id={id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    let record_id = records[0]["id"].as_str().unwrap();

    let (status, _, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/records/{record_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["analyses"].as_array().unwrap().len(), 1);

    let (status, _, body) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/data-sources/{id}"),
        Some(&token),
        Some(json!({ "status": "paused" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "paused");

    let (status, _, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/data-sources/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/data-sources/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_manual_collect_is_reported_and_backs_off() {
    let collector = ScriptedCollector::default();
    collector.set_failing(true);
    let state = test_state(collector).await;
    let app = router(state.clone());
    let token = admin_token(&app).await;
    let src = common::add_source(&state, "flaky");

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/data-sources/{}/collect", src.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let after = state.registry.get(src.id).unwrap();
    assert_eq!(after.consecutive_failures, 1);
    assert!(after.last_error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn bad_path_id_is_bad_request() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let token = admin_token(&app).await;
    let (status, _, body) = send(&app, Method::GET, "/api/v1/data-sources/not-a-uuid", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn alert_rules_crud_over_http() {
    let app = router(test_state(ScriptedCollector::default()).await);
    let token = admin_token(&app).await;

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/alerts/rules",
        Some(&token),
        Some(json!({
            "name": "negativity",
            "metric": { "type": "negative_share" },
            "comparator": "above",
            "threshold": 0.5,
            "priority": "high"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/alerts/rules",
        Some(&token),
        Some(json!({
            "name": "broken",
            "metric": { "type": "negative_share" },
            "comparator": "above",
            "threshold": 3.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/api/v1/alerts/rules",
        Some(&token),
        Some(json!({
            "name": "endless",
            "metric": { "type": "record_volume" },
            "comparator": "above",
            "threshold": 1.0,
            "window_secs": 10_000_000_000_000u64
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (_, _, body) = send(&app, Method::GET, "/api/v1/alerts/rules", Some(&token), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/alerts/rules/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/alerts/rules/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn collect_fires_alert_visible_over_http() {
    let collector = ScriptedCollector::default();
    collector.set_items(vec![
        RawItem::new("Breach", "Massive breach, data stolen in fraud attack"),
        RawItem::new("Attack", "Another attack and breach reported"),
    ]);
    let state = test_state(collector).await;
    let app = router(state.clone());
    let token = admin_token(&app).await;
    let src = common::add_source(&state, "alerts feed");

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/alerts/rules",
        Some(&token),
        Some(json!({
            "name": "all negative",
            "metric": { "type": "negative_share" },
            "comparator": "above",
            "threshold": 0.5,
            "min_samples": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/data-sources/{}/collect", src.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["alerts_fired"], 1, "{body}");

    let (_, _, body) = send(&app, Method::GET, "/api/v1/alerts?unread_only=true", Some(&token), None).await;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    let alert_id = events[0]["id"].as_str().unwrap();

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/alerts/{alert_id}/read"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_read"], true);

    let (_, _, body) = send(&app, Method::GET, "/api/v1/alerts?unread_only=true", Some(&token), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _, body) = send(&app, Method::GET, "/api/v1/reports/summary?hours=1", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alerts"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["sentiment"]["total"], 2);

    let (status, _, body) = send(&app, Method::GET, "/api/v1/analysis/sentiment", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
}

#[tokio::test]
async fn detailed_health_reports_store_counts() {
    let state = test_state(ScriptedCollector::default()).await;
    let app = router(state.clone());
    common::add_source(&state, "one");
    let (status, _, body) = send(&app, Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sources"], 1);
    assert_eq!(body["data"]["store"]["records"], 0);
}
