mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, body_to_vec, TestApp};
use firewarden::domain::Role;
use std::io::Cursor;

fn tiny_png() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("encode test png");
    cursor.into_inner()
}

#[tokio::test]
async fn upload_download_roundtrip_with_thumbnail() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    let png = tiny_png();
    let response = app
        .upload_file("site-photo.png", "image/png", &png, &token)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total_uploaded"].as_i64().unwrap(), 1);
    let file = &body["uploaded_files"][0];
    assert_eq!(file["file_type"], "images");
    assert_eq!(file["original_filename"], "site-photo.png");
    let file_id = file["id"].as_str().unwrap().to_string();
    assert!(file["thumbnail_url"].is_string());

    // blob and thumbnail both landed in storage
    assert_eq!(app.storage().object_count().await, 2);

    let response = app
        .get(&format!("/api/files/{file_id}/download"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/png"
    );
    let bytes = body_to_vec(response.into_body()).await?;
    assert_eq!(bytes, png);

    let response = app
        .get(&format!("/api/files/{file_id}/thumbnail"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/png"
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn disallowed_extensions_are_rejected_per_file() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let token = app.login_token("user@hospital.test", "s3cret-pass").await?;

    let response = app
        .upload_file("script.exe", "application/octet-stream", b"MZ", &token)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["total_uploaded"].as_i64().unwrap(), 0);
    assert_eq!(body["total_errors"].as_i64().unwrap(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn private_files_are_hidden_from_other_users() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner@hospital.test", "s3cret-pass", Role::User)
        .await?;
    app.insert_user("other@hospital.test", "s3cret-pass", Role::User)
        .await?;
    app.insert_user("admin@hospital.test", "s3cret-pass", Role::Admin)
        .await?;
    let owner_token = app.login_token("owner@hospital.test", "s3cret-pass").await?;
    let other_token = app.login_token("other@hospital.test", "s3cret-pass").await?;
    let admin_token = app.login_token("admin@hospital.test", "s3cret-pass").await?;

    let response = app
        .upload_file("notes.txt", "text/plain", b"private notes", &owner_token)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let file_id = body["uploaded_files"][0]["id"].as_str().unwrap().to_string();

    // uploads default to private
    let response = app
        .get(&format!("/api/files/{file_id}"), Some(&other_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // invisible in the other user's listing too
    let response = app.get("/api/files", Some(&other_token)).await?;
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["pagination"]["total"].as_i64().unwrap(), 0);

    // owner and managers can read it
    let response = app
        .get(&format!("/api/files/{file_id}"), Some(&owner_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .get(&format!("/api/files/{file_id}"), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_file_removes_the_blob() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner@hospital.test", "s3cret-pass", Role::User)
        .await?;
    app.insert_user("other@hospital.test", "s3cret-pass", Role::User)
        .await?;
    let owner_token = app.login_token("owner@hospital.test", "s3cret-pass").await?;
    let other_token = app.login_token("other@hospital.test", "s3cret-pass").await?;

    let response = app
        .upload_file("report.pdf", "application/pdf", b"%PDF-1.4", &owner_token)
        .await?;
    let body = body_to_json(response.into_body()).await?;
    let file_id = body["uploaded_files"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(app.storage().object_count().await, 1);

    let response = app
        .delete(&format!("/api/files/{file_id}"), Some(&other_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/files/{file_id}"), Some(&owner_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage().object_count().await, 0);

    let response = app
        .get(&format!("/api/files/{file_id}"), Some(&owner_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
