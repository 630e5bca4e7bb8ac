mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use firewarden::domain::Role;
use serde_json::json;

#[tokio::test]
async fn save_then_restore_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    let response = app
        .post_json(
            "/api/sync/save",
            &json!({
                "page": "/inspections",
                "data": { "draft": "smoke detector notes" },
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get("/api/sync/restore?page=/inspections", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["draft"], "smoke detector notes");

    // a page with nothing saved restores an empty object
    let response = app
        .get("/api/sync/restore?page=/devices", Some(&token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"], json!({}));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn save_overwrites_unconditionally() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    for value in ["first", "second"] {
        let response = app
            .post_json(
                "/api/sync/save",
                &json!({ "page": "/devices", "data": { "value": value } }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .get("/api/sync/restore?page=/devices", Some(&token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["value"], "second");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn import_applies_only_strictly_newer_items() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    // stored record at 2024-06-15T12:00:00Z
    let response = app
        .post_json(
            "/api/sync/save",
            &json!({
                "page": "/maintenance",
                "data": { "value": "stored" },
                "timestamp": 1718452800.0,
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // an older incoming item is silently skipped
    let response = app
        .post_json(
            "/api/sync/import",
            &json!({
                "data": [{
                    "page_path": "/maintenance",
                    "data": { "value": "older" },
                    "timestamp": "2024-06-15T11:59:59Z",
                }]
            }),
            Some(&token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["imported_count"].as_i64().unwrap(), 0);

    let response = app
        .get("/api/sync/restore?page=/maintenance", Some(&token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["value"], "stored");

    // a strictly newer one wins
    let response = app
        .post_json(
            "/api/sync/import",
            &json!({
                "data": [{
                    "page_path": "/maintenance",
                    "data": { "value": "newer" },
                    "timestamp": "2024-06-15T12:00:01Z",
                }]
            }),
            Some(&token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["imported_count"].as_i64().unwrap(), 1);

    let response = app
        .get("/api/sync/restore?page=/maintenance", Some(&token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["value"], "newer");

    // unseen pages are created
    let response = app
        .post_json(
            "/api/sync/import",
            &json!({
                "data": [{
                    "page_path": "/reports",
                    "data": { "value": "fresh" },
                    "timestamp": "2024-06-15T12:00:00Z",
                }]
            }),
            Some(&token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["imported_count"].as_i64().unwrap(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn cleanup_scopes_to_own_rows_unless_manager() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let user_token = app.login_token("user@hospital.test", "s3cret-pass").await?;
    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;

    // two stale records, one per user (epoch 2001-09-09)
    for token in [&user_token, &admin_token] {
        let response = app
            .post_json(
                "/api/sync/save",
                &json!({ "page": "/old", "data": {"v": 1}, "timestamp": 1000000000.0 }),
                Some(token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    // the ordinary user only clears their own stale row
    let response = app
        .post_json("/api/sync/cleanup", &json!({ "days_old": 30 }), Some(&user_token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["deleted_count"].as_i64().unwrap(), 1);

    // the manager clears everything stale that is left
    let response = app
        .post_json("/api/sync/cleanup", &json!({ "days_old": 30 }), Some(&admin_token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["deleted_count"].as_i64().unwrap(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn stats_and_export_cover_the_callers_records() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    for page in ["/a", "/b"] {
        app.post_json(
            "/api/sync/save",
            &json!({ "page": page, "data": {"v": page} }),
            Some(&token),
        )
        .await?;
    }

    let response = app.get("/api/sync/stats", Some(&token)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["user_stats"]["saved_data_count"].as_i64().unwrap(), 2);
    // ordinary users see no system-wide section
    assert!(body.get("general_stats").is_none());

    let response = app.get("/api/sync/export", Some(&token)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["user_email"], "user@hospital.test");

    let response = app.get("/api/sync/all", Some(&token)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total_pages"].as_i64().unwrap(), 2);

    app.cleanup().await?;
    Ok(())
}
