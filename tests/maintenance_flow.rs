mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use firewarden::domain::Role;
use serde_json::json;
use uuid::Uuid;

struct Fixture {
    admin_token: String,
    tech_token: String,
    tech_id: Uuid,
    device_id: String,
}

async fn fixture(app: &TestApp) -> Result<Fixture> {
    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let tech_id = app
        .insert_user("tech@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;
    let tech_token = app.login_token("tech@hospital.test", "s3cret-pass").await?;

    let response = app
        .post_json(
            "/api/devices",
            &json!({ "name": "Pump P1", "type": "fire_pump", "location": "Basement" }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    let device_id = body["id"].as_str().unwrap().to_string();

    Ok(Fixture {
        admin_token,
        tech_token,
        tech_id,
        device_id,
    })
}

async fn create_task(
    app: &TestApp,
    fx: &Fixture,
    title: &str,
    scheduled_date: Option<&str>,
) -> Result<String> {
    let mut payload = json!({
        "device_id": fx.device_id,
        "assigned_user_id": fx.tech_id,
        "title": title,
    });
    if let Some(date) = scheduled_date {
        payload["scheduled_date"] = json!(date);
    }
    let response = app
        .post_json("/api/maintenance", &payload, Some(&fx.admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response.into_body()).await?;
    Ok(body["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn completing_a_task_stamps_the_completion_date_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = fixture(&app).await?;

    let task_id = create_task(&app, &fx, "Replace pressure valve", None).await?;

    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "status": "completed" }),
            Some(&fx.tech_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let first_stamp = body["completed_date"].as_str().unwrap().to_string();

    // writing `completed` again leaves the stamp untouched
    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "status": "completed" }),
            Some(&fx.tech_token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["completed_date"].as_str().unwrap(), first_stamp);

    // leaving `completed` does not clear it either
    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "status": "pending" }),
            Some(&fx.tech_token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["completed_date"].as_str().unwrap(), first_stamp);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn overdue_is_derived_from_status_and_schedule() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = fixture(&app).await?;

    let task_id = create_task(&app, &fx, "Check couplings", Some("2020-01-01T00:00:00")).await?;

    let response = app
        .get(&format!("/api/maintenance/{task_id}"), Some(&fx.tech_token))
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["is_overdue"], true);

    // any non-pending status clears the derived flag immediately
    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "status": "in_progress" }),
            Some(&fx.tech_token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["is_overdue"], false);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reassignment_is_manager_only_and_validates_the_user() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = fixture(&app).await?;

    let other_id = app
        .insert_user("other@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    let task_id = create_task(&app, &fx, "Grease bearings", None).await?;

    // the assignee may edit, but not hand the task to someone else
    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "assigned_user_id": other_id }),
            Some(&fx.tech_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // a manager can, provided the target exists
    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "assigned_user_id": Uuid::new_v4() }),
            Some(&fx.admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "assigned_user_id": other_id }),
            Some(&fx.admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["assigned_user_id"].as_str().unwrap(), other_id.to_string());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unrelated_users_cannot_update_and_only_managers_delete() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = fixture(&app).await?;

    app.insert_user("other@hospital.test", "s3cret-pass", Role::Technician)
        .await?;
    let other_token = app.login_token("other@hospital.test", "s3cret-pass").await?;

    let task_id = create_task(&app, &fx, "Inspect nozzles", None).await?;

    let response = app
        .put_json(
            &format!("/api/maintenance/{task_id}"),
            &json!({ "notes": "not mine" }),
            Some(&other_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/maintenance/{task_id}"), Some(&fx.tech_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/maintenance/{task_id}"), Some(&fx.admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn stats_reflect_status_counts_and_overdue() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = fixture(&app).await?;

    let _past_due = create_task(&app, &fx, "Past due", Some("2020-01-01T00:00:00")).await?;
    let _future = create_task(&app, &fx, "Future", Some("2099-01-01T00:00:00")).await?;
    let third = create_task(&app, &fx, "Done", None).await?;

    let response = app
        .put_json(
            &format!("/api/maintenance/{third}"),
            &json!({ "status": "completed" }),
            Some(&fx.admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/api/maintenance/stats", Some(&fx.admin_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total_tasks"].as_i64().unwrap(), 3);
    assert_eq!(body["pending_tasks"].as_i64().unwrap(), 2);
    assert_eq!(body["completed_tasks"].as_i64().unwrap(), 1);
    assert_eq!(body["overdue_tasks"].as_i64().unwrap(), 1);

    // schedule picks up the far-future task within an explicit window
    let response = app
        .get(
            "/api/maintenance/schedule?start_date=2098-12-01T00:00:00&end_date=2099-02-01T00:00:00",
            Some(&fx.admin_token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total_tasks"].as_i64().unwrap(), 1);

    app.cleanup().await?;
    Ok(())
}
