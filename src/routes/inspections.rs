use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::InspectionStatus,
    error::{AppError, AppResult},
    models::{Device, Inspection, NewInspection},
    schema::{devices, inspections, users},
    state::AppState,
};

use super::{page_window, Pagination};

#[derive(Serialize)]
pub struct InspectionResponse {
    pub id: Uuid,
    pub device_id: Uuid,
    pub device_name: String,
    pub device_location: String,
    pub inspector_id: Uuid,
    pub inspector_name: String,
    pub inspection_date: NaiveDateTime,
    pub status: InspectionStatus,
    pub notes: Option<String>,
    pub images: Value,
    pub created_at: NaiveDateTime,
    pub can_edit: bool,
}

fn to_response(
    inspection: Inspection,
    device_name: String,
    device_location: String,
    inspector_name: String,
    caller: &AuthenticatedUser,
) -> InspectionResponse {
    let can_edit = inspection.inspector_id == caller.id() || caller.can_manage_users();
    InspectionResponse {
        id: inspection.id,
        device_id: inspection.device_id,
        device_name,
        device_location,
        inspector_id: inspection.inspector_id,
        inspector_name,
        inspection_date: inspection.inspection_date,
        status: inspection.status,
        notes: inspection.notes,
        images: inspection.images,
        created_at: inspection.created_at,
        can_edit,
    }
}

#[derive(Deserialize)]
pub struct InspectionListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub device_id: Option<Uuid>,
    pub status: Option<InspectionStatus>,
    pub inspector_id: Option<Uuid>,
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct InspectionListResponse {
    pub inspections: Vec<InspectionResponse>,
    pub pagination: Pagination,
}

pub async fn list_inspections(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<InspectionListQuery>,
) -> AppResult<Json<InspectionListResponse>> {
    let (page, per_page) = page_window(params.page, params.per_page);
    let mut conn = state.db()?;

    let mut query = inspections::table
        .inner_join(devices::table)
        .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
        .select((
            inspections::all_columns,
            devices::name,
            devices::location,
            users::name,
        ))
        .into_boxed();
    let mut count_query = inspections::table.select(count_star()).into_boxed();

    if let Some(device_id) = params.device_id {
        query = query.filter(inspections::device_id.eq(device_id));
        count_query = count_query.filter(inspections::device_id.eq(device_id));
    }
    if let Some(status) = params.status {
        query = query.filter(inspections::status.eq(status));
        count_query = count_query.filter(inspections::status.eq(status));
    }
    if let Some(inspector_id) = params.inspector_id {
        query = query.filter(inspections::inspector_id.eq(inspector_id));
        count_query = count_query.filter(inspections::inspector_id.eq(inspector_id));
    }
    if let Some(from) = params.date_from {
        query = query.filter(inspections::inspection_date.ge(from));
        count_query = count_query.filter(inspections::inspection_date.ge(from));
    }
    if let Some(to) = params.date_to {
        query = query.filter(inspections::inspection_date.le(to));
        count_query = count_query.filter(inspections::inspection_date.le(to));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<(Inspection, String, String, String)> = query
        .order(inspections::inspection_date.desc())
        .offset((page - 1) * per_page)
        .limit(per_page)
        .load(&mut conn)?;

    Ok(Json(InspectionListResponse {
        inspections: rows
            .into_iter()
            .map(|(inspection, device_name, device_location, inspector_name)| {
                to_response(
                    inspection,
                    device_name,
                    device_location,
                    inspector_name,
                    &caller,
                )
            })
            .collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Deserialize)]
pub struct CreateInspectionRequest {
    pub device_id: Uuid,
    pub status: Option<InspectionStatus>,
    pub notes: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub inspection_date: Option<NaiveDateTime>,
}

pub async fn create_inspection(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<CreateInspectionRequest>,
) -> AppResult<(StatusCode, Json<InspectionResponse>)> {
    let mut conn = state.db()?;

    let device: Option<Device> = devices::table
        .find(payload.device_id)
        .first(&mut conn)
        .optional()?;
    let device = device.ok_or_else(AppError::not_found)?;

    // Backdating is allowed; image order is stored exactly as submitted.
    let new_inspection = NewInspection {
        id: Uuid::new_v4(),
        device_id: device.id,
        inspector_id: caller.id(),
        inspection_date: payload
            .inspection_date
            .unwrap_or_else(|| Utc::now().naive_utc()),
        status: payload.status.unwrap_or(InspectionStatus::Good),
        notes: payload.notes,
        images: Value::from(payload.images),
    };

    diesel::insert_into(inspections::table)
        .values(&new_inspection)
        .execute(&mut conn)?;

    let inspection: Inspection = inspections::table.find(new_inspection.id).first(&mut conn)?;
    info!(
        inspection_id = %inspection.id,
        device_id = %device.id,
        status = %inspection.status,
        "recorded inspection"
    );

    Ok((
        StatusCode::CREATED,
        Json(to_response(
            inspection,
            device.name,
            device.location,
            caller.user.name.clone(),
            &caller,
        )),
    ))
}

pub async fn get_inspection(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<Json<InspectionResponse>> {
    let mut conn = state.db()?;

    let (inspection, device_name, device_location, inspector_name): (
        Inspection,
        String,
        String,
        String,
    ) = inspections::table
        .inner_join(devices::table)
        .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
        .filter(inspections::id.eq(inspection_id))
        .select((
            inspections::all_columns,
            devices::name,
            devices::location,
            users::name,
        ))
        .first(&mut conn)?;

    Ok(Json(to_response(
        inspection,
        device_name,
        device_location,
        inspector_name,
        &caller,
    )))
}

#[derive(Deserialize)]
pub struct UpdateInspectionRequest {
    pub status: Option<InspectionStatus>,
    pub notes: Option<String>,
    pub images: Option<Vec<String>>,
    pub inspection_date: Option<NaiveDateTime>,
}

pub async fn update_inspection(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(inspection_id): Path<Uuid>,
    Json(payload): Json<UpdateInspectionRequest>,
) -> AppResult<Json<InspectionResponse>> {
    let mut conn = state.db()?;
    let existing: Inspection = inspections::table.find(inspection_id).first(&mut conn)?;

    if existing.inspector_id != caller.id() && !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to update this inspection"));
    }

    if let Some(status) = payload.status {
        diesel::update(inspections::table.find(inspection_id))
            .set(inspections::status.eq(status))
            .execute(&mut conn)?;
    }
    if let Some(notes) = payload.notes {
        diesel::update(inspections::table.find(inspection_id))
            .set(inspections::notes.eq(Some(notes)))
            .execute(&mut conn)?;
    }
    if let Some(images) = payload.images {
        diesel::update(inspections::table.find(inspection_id))
            .set(inspections::images.eq(Value::from(images)))
            .execute(&mut conn)?;
    }
    if let Some(inspection_date) = payload.inspection_date {
        diesel::update(inspections::table.find(inspection_id))
            .set(inspections::inspection_date.eq(inspection_date))
            .execute(&mut conn)?;
    }

    let (inspection, device_name, device_location, inspector_name): (
        Inspection,
        String,
        String,
        String,
    ) = inspections::table
        .inner_join(devices::table)
        .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
        .filter(inspections::id.eq(inspection_id))
        .select((
            inspections::all_columns,
            devices::name,
            devices::location,
            users::name,
        ))
        .first(&mut conn)?;

    Ok(Json(to_response(
        inspection,
        device_name,
        device_location,
        inspector_name,
        &caller,
    )))
}

#[derive(Serialize)]
pub struct StatusCount {
    pub status: InspectionStatus,
    pub count: i64,
}

#[derive(Serialize)]
pub struct InspectorCount {
    pub inspector: String,
    pub count: i64,
}

#[derive(Serialize)]
pub struct DailyCount {
    pub date: chrono::NaiveDate,
    pub count: i64,
}

#[derive(Serialize)]
pub struct TopInspectedDevice {
    pub device_name: String,
    pub location: String,
    pub inspection_count: i64,
}

#[derive(Serialize)]
pub struct InspectionStatsResponse {
    pub total_inspections: i64,
    pub today_inspections: i64,
    pub status_distribution: Vec<StatusCount>,
    pub inspector_performance: Vec<InspectorCount>,
    pub weekly_trend: Vec<DailyCount>,
    pub top_devices: Vec<TopInspectedDevice>,
}

pub async fn inspection_stats(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<InspectionStatsResponse>> {
    use std::collections::BTreeMap;

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let today_start = now.date().and_hms_opt(0, 0, 0).unwrap_or(now);

    let total_inspections: i64 = inspections::table.select(count_star()).first(&mut conn)?;
    let today_inspections: i64 = inspections::table
        .filter(inspections::inspection_date.ge(today_start))
        .select(count_star())
        .first(&mut conn)?;

    let status_rows: Vec<(InspectionStatus, i64)> = inspections::table
        .group_by(inspections::status)
        .select((inspections::status, count_star()))
        .load(&mut conn)?;

    let inspector_rows: Vec<(String, i64)> = inspections::table
        .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
        .group_by((users::id, users::name))
        .select((users::name, count_star()))
        .load(&mut conn)?;

    let week_ago = now - chrono::Duration::days(7);
    let recent_dates: Vec<NaiveDateTime> = inspections::table
        .filter(inspections::inspection_date.ge(week_ago))
        .select(inspections::inspection_date)
        .load(&mut conn)?;
    let mut daily: BTreeMap<chrono::NaiveDate, i64> = BTreeMap::new();
    for date in recent_dates {
        *daily.entry(date.date()).or_insert(0) += 1;
    }

    let top_rows: Vec<(String, String, i64)> = inspections::table
        .inner_join(devices::table)
        .group_by((devices::id, devices::name, devices::location))
        .select((devices::name, devices::location, count_star()))
        .order(count_star().desc())
        .limit(10)
        .load(&mut conn)?;

    Ok(Json(InspectionStatsResponse {
        total_inspections,
        today_inspections,
        status_distribution: status_rows
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        inspector_performance: inspector_rows
            .into_iter()
            .map(|(inspector, count)| InspectorCount { inspector, count })
            .collect(),
        weekly_trend: daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        top_devices: top_rows
            .into_iter()
            .map(|(device_name, location, inspection_count)| TopInspectedDevice {
                device_name,
                location,
                inspection_count,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct BulkCreateInspectionsRequest {
    pub inspections: Vec<CreateInspectionRequest>,
}

#[derive(Serialize)]
pub struct BulkCreateInspectionsResponse {
    pub total_created: usize,
    pub total_errors: usize,
    pub errors: Vec<String>,
}

pub async fn bulk_create_inspections(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<BulkCreateInspectionsRequest>,
) -> AppResult<Json<BulkCreateInspectionsResponse>> {
    if payload.inspections.is_empty() {
        return Err(AppError::bad_request("inspections must not be empty"));
    }

    let mut conn = state.db()?;
    let mut created = 0usize;
    let mut errors = Vec::new();

    for item in payload.inspections {
        let device: Option<Device> = devices::table
            .find(item.device_id)
            .first(&mut conn)
            .optional()?;
        if device.is_none() {
            errors.push(format!("device {} does not exist", item.device_id));
            continue;
        }

        let new_inspection = NewInspection {
            id: Uuid::new_v4(),
            device_id: item.device_id,
            inspector_id: caller.id(),
            inspection_date: item
                .inspection_date
                .unwrap_or_else(|| Utc::now().naive_utc()),
            status: item.status.unwrap_or(InspectionStatus::Good),
            notes: item.notes,
            images: Value::from(item.images),
        };
        diesel::insert_into(inspections::table)
            .values(&new_inspection)
            .execute(&mut conn)?;
        created += 1;
    }

    info!(created, failed = errors.len(), "bulk inspection entry");
    Ok(Json(BulkCreateInspectionsResponse {
        total_created: created,
        total_errors: errors.len(),
        errors,
    }))
}

pub async fn delete_inspection(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(inspection_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let existing: Inspection = inspections::table.find(inspection_id).first(&mut conn)?;

    if existing.inspector_id != caller.id() && !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to delete this inspection"));
    }

    diesel::delete(inspections::table.find(inspection_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}
