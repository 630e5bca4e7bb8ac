mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use firewarden::domain::Role;
use serde_json::json;
use uuid::Uuid;

async fn create_device(app: &TestApp, admin_token: &str, name: &str) -> Result<String> {
    let response = app
        .post_json(
            "/api/devices",
            &json!({ "name": name, "type": "smoke_detector", "location": "First floor" }),
            Some(admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    Ok(body["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn inspection_requires_an_existing_device() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("tech@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    let token = app.login_token("tech@hospital.test", "s3cret-pass").await?;

    let response = app
        .post_json(
            "/api/inspections",
            &json!({ "device_id": Uuid::new_v4(), "status": "good" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn any_authenticated_user_can_inspect_and_images_keep_their_order() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    app.insert_user("tech@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;
    let tech_token = app.login_token("tech@hospital.test", "s3cret-pass").await?;

    let device_id = create_device(&app, &admin_token, "Detector 1F").await?;

    let response = app
        .post_json(
            "/api/inspections",
            &json!({
                "device_id": device_id,
                "status": "warning",
                "notes": "Cover loose",
                "images": ["z.jpg", "a.jpg", "m.jpg"],
            }),
            Some(&tech_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "warning");
    assert_eq!(
        body["images"],
        json!(["z.jpg", "a.jpg", "m.jpg"]),
        "image order must be preserved as submitted"
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn backdated_inspection_keeps_the_submitted_date() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let token = app.login_token("admin@hospital.test", "s3cret-pass").await?;
    let device_id = create_device(&app, &token, "Detector 2F").await?;

    let response = app
        .post_json(
            "/api/inspections",
            &json!({
                "device_id": device_id,
                "status": "good",
                "inspection_date": "2024-01-15T08:30:00",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["inspection_date"], "2024-01-15T08:30:00");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_the_inspector_or_a_manager_can_mutate() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    app.insert_user("owner@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    app.insert_user("other@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;
    let owner_token = app.login_token("owner@hospital.test", "s3cret-pass").await?;
    let other_token = app.login_token("other@hospital.test", "s3cret-pass").await?;

    let device_id = create_device(&app, &admin_token, "Hose H1").await?;

    let response = app
        .post_json(
            "/api/inspections",
            &json!({ "device_id": device_id, "status": "good" }),
            Some(&owner_token),
        )
        .await?;
    let inspection = body_to_json(response.into_body()).await?;
    let inspection_id = inspection["id"].as_str().unwrap().to_string();

    // an unrelated technician cannot touch it
    let response = app
        .put_json(
            &format!("/api/inspections/{inspection_id}"),
            &json!({ "status": "danger" }),
            Some(&other_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .delete(&format!("/api/inspections/{inspection_id}"), Some(&other_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // the owner can reclassify freely
    let response = app
        .put_json(
            &format!("/api/inspections/{inspection_id}"),
            &json!({ "status": "danger" }),
            Some(&owner_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "danger");

    // and a manager can remove it
    let response = app
        .delete(&format!("/api/inspections/{inspection_id}"), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn list_filters_by_device_and_status() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let token = app.login_token("admin@hospital.test", "s3cret-pass").await?;

    let first = create_device(&app, &token, "Detector A").await?;
    let second = create_device(&app, &token, "Detector B").await?;

    for (device, status) in [(&first, "good"), (&first, "danger"), (&second, "good")] {
        let response = app
            .post_json(
                "/api/inspections",
                &json!({ "device_id": device, "status": status }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .get(&format!("/api/inspections?device_id={first}"), Some(&token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["pagination"]["total"].as_i64().unwrap(), 2);

    let response = app.get("/api/inspections?status=danger", Some(&token)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["pagination"]["total"].as_i64().unwrap(), 1);

    app.cleanup().await?;
    Ok(())
}
