mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use firewarden::domain::Role;
use serde_json::json;

#[tokio::test]
async fn listing_users_requires_manage_capability() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("plain@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;

    let plain_token = app.login_token("plain@hospital.test", "s3cret-pass").await?;
    let response = app.get("/api/users", Some(&plain_token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;
    let response = app.get("/api/users", Some(&admin_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["pagination"]["total"].as_i64().unwrap(), 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn safety_manager_cannot_manage_users() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("sm@hospital.test", "s3cret-pass", Role::SafetyManager)
        .await?;
    let token = app.login_token("sm@hospital.test", "s3cret-pass").await?;

    let response = app
        .post_json(
            "/api/users",
            &json!({ "email": "new@hospital.test", "name": "New User" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_provisions_a_user_with_temp_password() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let token = app.login_token("admin@hospital.test", "s3cret-pass").await?;

    let response = app
        .post_json(
            "/api/users",
            &json!({
                "email": "tech@hospital.test",
                "name": "New Technician",
                "role": "technician",
                "temp_password": "first-login-1",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["role"], "technician");
    assert_eq!(body["is_verified"], false);

    // the provisioned account can log in with the temp password
    app.login_token("tech@hospital.test", "first-login-1").await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn self_deletion_and_self_deactivation_are_forbidden() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_id = app
        .insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let token = app.login_token("admin@hospital.test", "s3cret-pass").await?;

    let response = app
        .delete(&format!("/api/users/{admin_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/users/{admin_id}/deactivate"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deactivation_locks_the_account_out() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let target_id = app
        .insert_user("target@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;

    let response = app
        .post_json(
            &format!("/api/users/{target_id}/deactivate"),
            &json!({}),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["is_active"], false);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "target@hospital.test", "password": "s3cret-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/users/{target_id}/activate"),
            &json!({}),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    app.login_token("target@hospital.test", "s3cret-pass").await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn non_admin_cannot_escalate_their_own_role() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let user_id = app
        .insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    // role changes by non-managers are ignored
    let response = app
        .put_json(
            &format!("/api/users/{user_id}"),
            &json!({ "name": "Renamed", "role": "admin" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["name"], "Renamed");
    assert_eq!(body["role"], "user");

    app.cleanup().await?;
    Ok(())
}
