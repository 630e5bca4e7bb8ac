use std::io::Cursor;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewUploadedFile, UploadedFile},
    schema::uploaded_files,
    state::AppState,
};

use super::{page_window, Pagination};

const THUMBNAIL_MAX_WIDTH: u32 = 200;
const THUMBNAIL_MAX_HEIGHT: u32 = 200;

const FILE_CATEGORIES: &[(&str, &[&str])] = &[
    ("images", &["png", "jpg", "jpeg", "gif", "bmp", "webp", "svg"]),
    (
        "documents",
        &[
            "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt", "ods", "odp",
        ],
    ),
    ("archives", &["zip", "rar", "7z", "tar", "gz"]),
    ("videos", &["mp4", "avi", "mov", "wmv", "flv", "webm"]),
    ("audio", &["mp3", "wav", "ogg", "aac", "m4a"]),
];

fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn file_type_of(filename: &str) -> Option<&'static str> {
    let extension = extension_of(filename)?;
    FILE_CATEGORIES
        .iter()
        .find(|(_, extensions)| extensions.contains(&extension.as_str()))
        .map(|(category, _)| *category)
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn unique_filename(original: &str) -> String {
    let sanitized = sanitize_filename(original);
    let (stem, extension) = match sanitized.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (sanitized, String::new()),
    };
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let short_id = &Uuid::new_v4().simple().to_string()[..8];
    format!("{stem}_{timestamp}_{short_id}{extension}")
}

fn thumbnail_key(filename: &str) -> String {
    format!("thumb_{filename}")
}

fn make_thumbnail(bytes: &[u8]) -> Option<Vec<u8>> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let decoded = reader.decode().ok()?;
    let scaled = decoded.thumbnail(THUMBNAIL_MAX_WIDTH, THUMBNAIL_MAX_HEIGHT);
    let mut cursor = Cursor::new(Vec::new());
    scaled.write_to(&mut cursor, ImageFormat::Png).ok()?;
    Some(cursor.into_inner())
}

#[derive(Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
    pub upload_date: NaiveDateTime,
    pub download_url: String,
    pub thumbnail_url: Option<String>,
}

impl From<UploadedFile> for FileResponse {
    fn from(file: UploadedFile) -> Self {
        let thumbnail_url = (file.file_type == "images")
            .then(|| format!("/api/files/{}/thumbnail", file.id));
        Self {
            download_url: format!("/api/files/{}/download", file.id),
            thumbnail_url,
            id: file.id,
            filename: file.filename,
            original_filename: file.original_filename,
            file_type: file.file_type,
            file_size: file.file_size,
            category: file.category,
            description: file.description,
            is_public: file.is_public,
            upload_date: file.upload_date,
        }
    }
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub total_uploaded: usize,
    pub total_errors: usize,
    pub uploaded_files: Vec<FileResponse>,
    pub errors: Vec<String>,
}

pub async fn upload_files(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut pending: Vec<(String, Vec<u8>)> = Vec::new();
    let mut category: Option<String> = None;
    let mut description: Option<String> = None;
    let mut is_public = false;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("files") | Some("file") => {
                let Some(filename) = field.file_name().map(|n| n.to_string()) else {
                    continue;
                };
                if filename.is_empty() {
                    continue;
                }
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                pending.push((filename, data.to_vec()));
            }
            Some("category") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid category: {err}")))?;
                if !value.trim().is_empty() {
                    category = Some(value.trim().to_string());
                }
            }
            Some("description") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid description: {err}")))?;
                if !value.trim().is_empty() {
                    description = Some(value.trim().to_string());
                }
            }
            Some("is_public") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid is_public: {err}")))?;
                is_public = value == "1" || value.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    if pending.is_empty() {
        return Err(AppError::bad_request("no files provided"));
    }

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    for (original_filename, bytes) in pending {
        let Some(file_type) = file_type_of(&original_filename) else {
            errors.push(format!("{original_filename}: file type is not allowed"));
            continue;
        };
        if bytes.len() > state.config.max_upload_bytes {
            errors.push(format!(
                "{original_filename}: exceeds the {} byte limit",
                state.config.max_upload_bytes
            ));
            continue;
        }

        let filename = unique_filename(&original_filename);
        if let Err(err) = state.storage.put_object(&filename, bytes.clone()).await {
            error!(error = %err, original_filename = %original_filename, "file upload failed");
            errors.push(format!("{original_filename}: storage failure"));
            continue;
        }

        let mut has_thumbnail = false;
        if file_type == "images" {
            match make_thumbnail(&bytes) {
                Some(thumb) => {
                    if let Err(err) = state.storage.put_object(&thumbnail_key(&filename), thumb).await
                    {
                        warn!(error = %err, filename = %filename, "thumbnail upload failed");
                    } else {
                        has_thumbnail = true;
                    }
                }
                None => {
                    warn!(filename = %filename, "could not decode image for thumbnail");
                }
            }
        }

        let new_file = NewUploadedFile {
            id: Uuid::new_v4(),
            uploader_id: caller.id(),
            filename: filename.clone(),
            original_filename: original_filename.clone(),
            file_type: file_type.to_string(),
            file_size: bytes.len() as i64,
            file_path: filename.clone(),
            category: category.clone(),
            description: description.clone(),
            is_public,
        };

        let mut conn = state.db()?;
        let inserted = diesel::insert_into(uploaded_files::table)
            .values(&new_file)
            .execute(&mut conn);

        match inserted {
            Ok(_) => {
                let file: UploadedFile =
                    uploaded_files::table.find(new_file.id).first(&mut conn)?;
                info!(
                    file_id = %file.id,
                    original_filename = %original_filename,
                    has_thumbnail,
                    "file uploaded"
                );
                uploaded.push(FileResponse::from(file));
            }
            Err(err) => {
                // best effort: do not leave orphaned blobs behind
                let _ = state.storage.delete_object(&filename).await;
                let _ = state.storage.delete_object(&thumbnail_key(&filename)).await;
                error!(error = %err, original_filename = %original_filename, "file metadata insert failed");
                errors.push(format!("{original_filename}: could not be saved"));
            }
        }
    }

    let status = if uploaded.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(UploadResponse {
            total_uploaded: uploaded.len(),
            total_errors: errors.len(),
            uploaded_files: uploaded,
            errors,
        }),
    ))
}

#[derive(Deserialize)]
pub struct FileListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub category: Option<String>,
    pub file_type: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub my_files_only: bool,
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub pagination: Pagination,
}

pub async fn list_files(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<FileListQuery>,
) -> AppResult<Json<FileListResponse>> {
    let (page, per_page) = page_window(params.page, params.per_page);
    let mut conn = state.db()?;

    let mut query = uploaded_files::table.into_boxed();
    let mut count_query = uploaded_files::table.select(count_star()).into_boxed();

    if params.my_files_only {
        query = query.filter(uploaded_files::uploader_id.eq(caller.id()));
        count_query = count_query.filter(uploaded_files::uploader_id.eq(caller.id()));
    } else {
        query = query.filter(
            uploaded_files::is_public
                .eq(true)
                .or(uploaded_files::uploader_id.eq(caller.id())),
        );
        count_query = count_query.filter(
            uploaded_files::is_public
                .eq(true)
                .or(uploaded_files::uploader_id.eq(caller.id())),
        );
    }
    if let Some(category) = params.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(uploaded_files::category.eq(category.to_string()));
        count_query = count_query.filter(uploaded_files::category.eq(category.to_string()));
    }
    if let Some(file_type) = params.file_type.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(uploaded_files::file_type.eq(file_type.to_string()));
        count_query = count_query.filter(uploaded_files::file_type.eq(file_type.to_string()));
    }
    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            uploaded_files::original_filename
                .ilike(pattern.clone())
                .or(uploaded_files::description.ilike(pattern.clone()).assume_not_null()),
        );
        count_query = count_query.filter(
            uploaded_files::original_filename
                .ilike(pattern.clone())
                .or(uploaded_files::description.ilike(pattern).assume_not_null()),
        );
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<UploadedFile> = query
        .order(uploaded_files::upload_date.desc())
        .offset((page - 1) * per_page)
        .limit(per_page)
        .load(&mut conn)?;

    Ok(Json(FileListResponse {
        files: rows.into_iter().map(FileResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

fn load_visible_file(
    conn: &mut PgConnection,
    caller: &AuthenticatedUser,
    file_id: Uuid,
) -> AppResult<UploadedFile> {
    let file: UploadedFile = uploaded_files::table.find(file_id).first(conn)?;
    if !file.is_public && file.uploader_id != caller.id() && !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to access this file"));
    }
    Ok(file)
}

pub async fn get_file(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<FileResponse>> {
    let mut conn = state.db()?;
    let file = load_visible_file(&mut conn, &caller, file_id)?;
    Ok(Json(FileResponse::from(file)))
}

pub async fn download_file(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let mut conn = state.db()?;
    let file = load_visible_file(&mut conn, &caller, file_id)?;
    drop(conn);

    let bytes = state
        .storage
        .get_object(&file.file_path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read stored file: {err}")))?;

    let content_type = mime_guess::from_path(&file.original_filename)
        .first_or_octet_stream()
        .to_string();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_filename(&file.original_filename)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or(HeaderValue::from_static("attachment")),
    );

    Ok((headers, bytes))
}

pub async fn file_thumbnail(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let mut conn = state.db()?;
    let file = load_visible_file(&mut conn, &caller, file_id)?;
    drop(conn);

    if file.file_type != "images" {
        return Err(AppError::not_found());
    }

    let bytes = state
        .storage
        .get_object(&thumbnail_key(&file.filename))
        .await
        .map_err(|_| AppError::not_found())?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    Ok((headers, bytes))
}

#[derive(Deserialize)]
pub struct UpdateFileRequest {
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_public: Option<bool>,
}

pub async fn update_file(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<UpdateFileRequest>,
) -> AppResult<Json<FileResponse>> {
    let mut conn = state.db()?;
    let file: UploadedFile = uploaded_files::table.find(file_id).first(&mut conn)?;

    if file.uploader_id != caller.id() && !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to update this file"));
    }

    if let Some(description) = payload.description {
        diesel::update(uploaded_files::table.find(file_id))
            .set(uploaded_files::description.eq(Some(description)))
            .execute(&mut conn)?;
    }
    if let Some(category) = payload.category {
        diesel::update(uploaded_files::table.find(file_id))
            .set(uploaded_files::category.eq(Some(category)))
            .execute(&mut conn)?;
    }
    if let Some(is_public) = payload.is_public {
        diesel::update(uploaded_files::table.find(file_id))
            .set(uploaded_files::is_public.eq(is_public))
            .execute(&mut conn)?;
    }

    let file: UploadedFile = uploaded_files::table.find(file_id).first(&mut conn)?;
    Ok(Json(FileResponse::from(file)))
}

/// Caller-facing grouping used when filing uploads; distinct from the
/// extension-derived `file_type`.
const UPLOAD_CATEGORIES: &[(&str, &str)] = &[
    ("general", "General"),
    ("forms", "Forms"),
    ("reports", "Reports"),
    ("procedures", "Procedures"),
    ("training", "Training"),
    ("maintenance", "Maintenance"),
    ("inspections", "Inspections"),
    ("certificates", "Certificates"),
    ("manuals", "Manuals"),
    ("policies", "Policies"),
];

pub async fn list_categories(_caller: AuthenticatedUser) -> Json<serde_json::Value> {
    let categories: Vec<serde_json::Value> = UPLOAD_CATEGORIES
        .iter()
        .map(|(value, label)| serde_json::json!({ "value": value, "label": label }))
        .collect();
    Json(serde_json::json!({ "categories": categories }))
}

fn format_file_size(size_bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if size_bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[derive(Serialize)]
pub struct TypeUsage {
    #[serde(rename = "type")]
    pub file_type: String,
    pub count: i64,
    pub total_size: i64,
    pub total_size_formatted: String,
}

#[derive(Serialize)]
pub struct CategoryUsage {
    pub category: Option<String>,
    pub count: i64,
}

#[derive(Serialize)]
pub struct FileStatsResponse {
    pub total_files: i64,
    pub user_files: i64,
    pub public_files: i64,
    pub total_size: i64,
    pub total_size_formatted: String,
    pub user_size: i64,
    pub user_size_formatted: String,
    pub type_distribution: Vec<TypeUsage>,
    pub category_distribution: Vec<CategoryUsage>,
}

pub async fn file_stats(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<FileStatsResponse>> {
    use std::collections::BTreeMap;

    let mut conn = state.db()?;
    let rows: Vec<(String, Option<String>, i64, Uuid, bool)> = uploaded_files::table
        .select((
            uploaded_files::file_type,
            uploaded_files::category,
            uploaded_files::file_size,
            uploaded_files::uploader_id,
            uploaded_files::is_public,
        ))
        .load(&mut conn)?;

    let mut total_size = 0i64;
    let mut user_size = 0i64;
    let mut user_files = 0i64;
    let mut public_files = 0i64;
    let mut by_type: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    let mut by_category: BTreeMap<Option<String>, i64> = BTreeMap::new();

    let total_files = rows.len() as i64;
    for (file_type, category, size, uploader_id, is_public) in rows {
        total_size += size;
        if uploader_id == caller.id() {
            user_files += 1;
            user_size += size;
        }
        if is_public {
            public_files += 1;
        }
        let entry = by_type.entry(file_type).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += size;
        *by_category.entry(category).or_insert(0) += 1;
    }

    Ok(Json(FileStatsResponse {
        total_files,
        user_files,
        public_files,
        total_size,
        total_size_formatted: format_file_size(total_size),
        user_size,
        user_size_formatted: format_file_size(user_size),
        type_distribution: by_type
            .into_iter()
            .map(|(file_type, (count, size))| TypeUsage {
                file_type,
                count,
                total_size: size,
                total_size_formatted: format_file_size(size),
            })
            .collect(),
        category_distribution: by_category
            .into_iter()
            .map(|(category, count)| CategoryUsage { category, count })
            .collect(),
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let file: UploadedFile = uploaded_files::table.find(file_id).first(&mut conn)?;

    if file.uploader_id != caller.id() && !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to delete this file"));
    }

    state
        .storage
        .delete_object(&file.file_path)
        .await
        .map_err(|err| AppError::internal(format!("failed to delete stored file: {err}")))?;
    let _ = state
        .storage
        .delete_object(&thumbnail_key(&file.filename))
        .await;

    diesel::delete(uploaded_files::table.find(file_id)).execute(&mut conn)?;
    info!(file_id = %file_id, deleted_by = %caller.id(), "deleted file");
    Ok(StatusCode::NO_CONTENT)
}
