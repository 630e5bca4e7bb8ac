use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{AutosaveRecord, NewAutosaveRecord},
    schema::autosave_records,
    state::AppState,
};

const DEFAULT_CLEANUP_AGE_DAYS: i64 = 30;

fn epoch_to_naive(seconds: f64) -> NaiveDateTime {
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.naive_utc())
        .unwrap_or_else(|| Utc::now().naive_utc())
}

fn naive_to_epoch(value: NaiveDateTime) -> f64 {
    value.and_utc().timestamp_millis() as f64 / 1000.0
}

/// Accepts RFC 3339 ("...Z") and plain ISO local timestamps; anything
/// unparseable falls back to the current time.
fn parse_client_timestamp(raw: &str) -> NaiveDateTime {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .unwrap_or_else(|_| Utc::now().naive_utc())
}

#[derive(Deserialize)]
pub struct SaveRequest {
    pub page: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: Option<f64>,
}

pub async fn save(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<SaveRequest>,
) -> AppResult<Json<Value>> {
    let page = payload.page.trim().to_string();
    if page.is_empty() {
        return Err(AppError::bad_request("page is required"));
    }

    let saved_at = payload
        .timestamp
        .map(epoch_to_naive)
        .unwrap_or_else(|| Utc::now().naive_utc());

    let record = NewAutosaveRecord {
        id: Uuid::new_v4(),
        user_id: caller.id(),
        page_path: page,
        data: payload.data,
        saved_at,
    };

    let mut conn = state.db()?;
    // Last caller wins; no version check, no merge.
    diesel::insert_into(autosave_records::table)
        .values(&record)
        .on_conflict((autosave_records::user_id, autosave_records::page_path))
        .do_update()
        .set((
            autosave_records::data.eq(&record.data),
            autosave_records::saved_at.eq(record.saved_at),
        ))
        .execute(&mut conn)?;

    Ok(Json(json!({ "timestamp": naive_to_epoch(saved_at) })))
}

#[derive(Deserialize)]
pub struct RestoreQuery {
    pub page: String,
}

pub async fn restore(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<RestoreQuery>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let record: Option<AutosaveRecord> = autosave_records::table
        .filter(autosave_records::user_id.eq(caller.id()))
        .filter(autosave_records::page_path.eq(&params.page))
        .first(&mut conn)
        .optional()?;

    match record {
        Some(record) => Ok(Json(json!({
            "data": record.data,
            "timestamp": naive_to_epoch(record.saved_at),
            "page_path": record.page_path,
        }))),
        None => Ok(Json(json!({ "data": {} }))),
    }
}

pub async fn all(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let records: Vec<AutosaveRecord> = autosave_records::table
        .filter(autosave_records::user_id.eq(caller.id()))
        .order(autosave_records::saved_at.desc())
        .load(&mut conn)?;

    let mut sync_data: BTreeMap<String, Value> = BTreeMap::new();
    for record in records {
        sync_data.insert(
            record.page_path,
            json!({
                "data": record.data,
                "timestamp": naive_to_epoch(record.saved_at),
            }),
        );
    }

    Ok(Json(json!({
        "total_pages": sync_data.len(),
        "sync_data": sync_data,
        "last_sync": naive_to_epoch(Utc::now().naive_utc()),
    })))
}

pub async fn export(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let records: Vec<AutosaveRecord> = autosave_records::table
        .filter(autosave_records::user_id.eq(caller.id()))
        .order(autosave_records::saved_at.desc())
        .load(&mut conn)?;

    let data: Vec<Value> = records
        .into_iter()
        .map(|record| {
            json!({
                "page_path": record.page_path,
                "data": record.data,
                "timestamp": record.saved_at.and_utc().to_rfc3339(),
            })
        })
        .collect();

    Ok(Json(json!({
        "user_id": caller.id(),
        "user_email": caller.user.email,
        "user_name": caller.user.name,
        "export_timestamp": Utc::now().to_rfc3339(),
        "data": data,
    })))
}

#[derive(Deserialize)]
pub struct ImportItem {
    pub page_path: Option<String>,
    pub data: Option<Value>,
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub data: Vec<ImportItem>,
}

pub async fn import(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<ImportRequest>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let mut imported_count = 0usize;

    for item in payload.data {
        let (Some(page_path), Some(data)) = (item.page_path, item.data) else {
            continue;
        };
        let timestamp = item
            .timestamp
            .as_deref()
            .map(parse_client_timestamp)
            .unwrap_or_else(|| Utc::now().naive_utc());

        let existing: Option<AutosaveRecord> = autosave_records::table
            .filter(autosave_records::user_id.eq(caller.id()))
            .filter(autosave_records::page_path.eq(&page_path))
            .first(&mut conn)
            .optional()?;

        match existing {
            Some(existing) => {
                // strictly newer wins; ties and older items are skipped
                if timestamp > existing.saved_at {
                    diesel::update(autosave_records::table.find(existing.id))
                        .set((
                            autosave_records::data.eq(data),
                            autosave_records::saved_at.eq(timestamp),
                        ))
                        .execute(&mut conn)?;
                    imported_count += 1;
                }
            }
            None => {
                diesel::insert_into(autosave_records::table)
                    .values(&NewAutosaveRecord {
                        id: Uuid::new_v4(),
                        user_id: caller.id(),
                        page_path,
                        data,
                        saved_at: timestamp,
                    })
                    .execute(&mut conn)?;
                imported_count += 1;
            }
        }
    }

    info!(user_id = %caller.id(), imported_count, "imported autosave records");
    Ok(Json(json!({ "imported_count": imported_count })))
}

#[derive(Deserialize, Default)]
pub struct ClearRequest {
    pub page: Option<String>,
}

pub async fn clear(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    payload: Option<Json<ClearRequest>>,
) -> AppResult<Json<Value>> {
    let page = payload.and_then(|Json(body)| body.page);
    let mut conn = state.db()?;

    let deleted = match page {
        Some(ref page) => diesel::delete(
            autosave_records::table
                .filter(autosave_records::user_id.eq(caller.id()))
                .filter(autosave_records::page_path.eq(page)),
        )
        .execute(&mut conn)?,
        None => diesel::delete(
            autosave_records::table.filter(autosave_records::user_id.eq(caller.id())),
        )
        .execute(&mut conn)?,
    };

    Ok(Json(json!({ "deleted_count": deleted })))
}

#[derive(Deserialize, Default)]
pub struct CleanupRequest {
    pub days_old: Option<i64>,
}

pub async fn cleanup(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    payload: Option<Json<CleanupRequest>>,
) -> AppResult<Json<Value>> {
    let days_old = payload
        .and_then(|Json(body)| body.days_old)
        .unwrap_or(DEFAULT_CLEANUP_AGE_DAYS);
    let cutoff = Utc::now().naive_utc() - Duration::days(days_old);

    let mut conn = state.db()?;
    let deleted = if caller.can_manage_users() {
        diesel::delete(autosave_records::table.filter(autosave_records::saved_at.lt(cutoff)))
            .execute(&mut conn)?
    } else {
        diesel::delete(
            autosave_records::table
                .filter(autosave_records::user_id.eq(caller.id()))
                .filter(autosave_records::saved_at.lt(cutoff)),
        )
        .execute(&mut conn)?
    };

    info!(user_id = %caller.id(), deleted, days_old, "cleaned up autosave records");
    Ok(Json(json!({ "deleted_count": deleted, "days_old": days_old })))
}

#[derive(Serialize)]
pub struct SyncStatsResponse {
    pub user_stats: UserSyncStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub general_stats: Option<GeneralSyncStats>,
}

#[derive(Serialize)]
pub struct UserSyncStats {
    pub saved_data_count: i64,
    pub saved_pages: Vec<String>,
    pub last_save_time: Option<f64>,
}

#[derive(Serialize)]
pub struct GeneralSyncStats {
    pub total_saved_data: i64,
    pub total_users_with_data: i64,
}

pub async fn stats(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<SyncStatsResponse>> {
    let mut conn = state.db()?;

    let saved_data_count: i64 = autosave_records::table
        .filter(autosave_records::user_id.eq(caller.id()))
        .select(count_star())
        .first(&mut conn)?;

    let saved_pages: Vec<String> = autosave_records::table
        .filter(autosave_records::user_id.eq(caller.id()))
        .select(autosave_records::page_path)
        .order(autosave_records::page_path.asc())
        .load(&mut conn)?;

    let last_save: Option<NaiveDateTime> = autosave_records::table
        .filter(autosave_records::user_id.eq(caller.id()))
        .order(autosave_records::saved_at.desc())
        .select(autosave_records::saved_at)
        .first(&mut conn)
        .optional()?;

    let general_stats = if caller.can_manage_users() {
        let total_saved_data: i64 = autosave_records::table
            .select(count_star())
            .first(&mut conn)?;
        let distinct_users: Vec<Uuid> = autosave_records::table
            .select(autosave_records::user_id)
            .distinct()
            .load(&mut conn)?;
        Some(GeneralSyncStats {
            total_saved_data,
            total_users_with_data: distinct_users.len() as i64,
        })
    } else {
        None
    };

    Ok(Json(SyncStatsResponse {
        user_stats: UserSyncStats {
            saved_data_count,
            saved_pages,
            last_save_time: last_save.map(naive_to_epoch),
        },
        general_stats,
    }))
}
