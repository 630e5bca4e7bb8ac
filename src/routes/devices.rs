use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::{DeviceStatus, DeviceType, InspectionStatus},
    error::{AppError, AppResult},
    models::{Device, NewDevice},
    schema::{devices, inspections, maintenance_tasks, users},
    state::AppState,
};

use super::{page_window, Pagination};

const MAINTENANCE_DUE_WINDOW_DAYS: i64 = 7;
const UPCOMING_MAINTENANCE_WINDOW_DAYS: i64 = 30;

/// Locations that always appear in the picker, whether or not a device is
/// registered there yet.
const DEFAULT_LOCATIONS: &[&str] = &[
    "Basement",
    "Emergency department",
    "First floor",
    "Ground floor",
    "Kitchen",
    "Laboratory",
    "Main corridor",
    "Main entrance",
    "Operating theatre",
    "Outpatient clinic",
    "Second floor",
    "Storage room",
];

#[derive(Serialize)]
pub struct LastInspectionSummary {
    pub date: NaiveDateTime,
    pub status: InspectionStatus,
    pub inspector: String,
}

#[derive(Serialize)]
pub struct DeviceResponse {
    pub id: Uuid,
    pub name: String,
    pub device_type: DeviceType,
    pub location: String,
    pub serial_number: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub last_maintenance: Option<NaiveDate>,
    pub next_maintenance: Option<NaiveDate>,
    pub status: DeviceStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            id: device.id,
            name: device.name,
            device_type: device.device_type,
            location: device.location,
            serial_number: device.serial_number,
            installation_date: device.installation_date,
            last_maintenance: device.last_maintenance,
            next_maintenance: device.next_maintenance,
            status: device.status,
            created_at: device.created_at,
            updated_at: device.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct DeviceListEntry {
    #[serde(flatten)]
    pub device: DeviceResponse,
    pub last_inspection: Option<LastInspectionSummary>,
    pub pending_tasks: i64,
    pub maintenance_due: bool,
    pub can_edit: bool,
}

#[derive(Deserialize)]
pub struct DeviceListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    #[serde(rename = "type")]
    pub device_type: Option<DeviceType>,
    pub status: Option<DeviceStatus>,
    pub location: Option<String>,
    pub search: Option<String>,
}

#[derive(Serialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceListEntry>,
    pub pagination: Pagination,
}

fn maintenance_due(next_maintenance: Option<NaiveDate>, today: NaiveDate) -> bool {
    next_maintenance
        .map(|due| due <= today + Duration::days(MAINTENANCE_DUE_WINDOW_DAYS))
        .unwrap_or(false)
}

pub async fn list_devices(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<DeviceListQuery>,
) -> AppResult<Json<DeviceListResponse>> {
    let (page, per_page) = page_window(params.page, params.per_page);
    let mut conn = state.db()?;

    let mut query = devices::table.into_boxed();
    let mut count_query = devices::table.select(count_star()).into_boxed();

    if let Some(device_type) = params.device_type {
        query = query.filter(devices::device_type.eq(device_type));
        count_query = count_query.filter(devices::device_type.eq(device_type));
    }
    if let Some(status) = params.status {
        query = query.filter(devices::status.eq(status));
        count_query = count_query.filter(devices::status.eq(status));
    }
    if let Some(location) = params.location.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{location}%");
        query = query.filter(devices::location.ilike(pattern.clone()));
        count_query = count_query.filter(devices::location.ilike(pattern));
    }
    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            devices::name
                .ilike(pattern.clone())
                .or(devices::location.ilike(pattern.clone()))
                .or(devices::serial_number.ilike(pattern.clone()).assume_not_null()),
        );
        count_query = count_query.filter(
            devices::name
                .ilike(pattern.clone())
                .or(devices::location.ilike(pattern.clone()))
                .or(devices::serial_number.ilike(pattern).assume_not_null()),
        );
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<Device> = query
        .order(devices::name.asc())
        .offset((page - 1) * per_page)
        .limit(per_page)
        .load(&mut conn)?;

    let today = Utc::now().date_naive();
    let can_edit = caller.can_manage_users();
    let mut entries = Vec::with_capacity(rows.len());

    for device in rows {
        let last_inspection: Option<(NaiveDateTime, InspectionStatus, String)> =
            inspections::table
                .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
                .filter(inspections::device_id.eq(device.id))
                .order(inspections::inspection_date.desc())
                .select((
                    inspections::inspection_date,
                    inspections::status,
                    users::name,
                ))
                .first(&mut conn)
                .optional()?;

        let pending_tasks: i64 = maintenance_tasks::table
            .filter(maintenance_tasks::device_id.eq(device.id))
            .filter(maintenance_tasks::status.eq(crate::domain::TaskStatus::Pending))
            .select(count_star())
            .first(&mut conn)?;

        let due = maintenance_due(device.next_maintenance, today);
        entries.push(DeviceListEntry {
            device: DeviceResponse::from(device),
            last_inspection: last_inspection.map(|(date, status, inspector)| {
                LastInspectionSummary {
                    date,
                    status,
                    inspector,
                }
            }),
            pending_tasks,
            maintenance_due: due,
            can_edit,
        });
    }

    Ok(Json(DeviceListResponse {
        devices: entries,
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub location: String,
    pub serial_number: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub next_maintenance: Option<NaiveDate>,
}

pub async fn create_device(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<CreateDeviceRequest>,
) -> AppResult<(StatusCode, Json<DeviceResponse>)> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to create devices"));
    }

    let mut conn = state.db()?;
    let device = insert_device(&mut conn, payload)?;
    info!(device_id = %device.id, created_by = %caller.id(), "registered device");
    Ok((StatusCode::CREATED, Json(DeviceResponse::from(device))))
}

fn insert_device(
    conn: &mut PgConnection,
    payload: CreateDeviceRequest,
) -> AppResult<Device> {
    let name = payload.name.trim().to_string();
    let location = payload.location.trim().to_string();
    if name.is_empty() || location.is_empty() {
        return Err(AppError::bad_request("name, type and location are required"));
    }

    let serial_number = payload
        .serial_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let new_device = NewDevice {
        id: Uuid::new_v4(),
        name,
        device_type: payload.device_type,
        location,
        serial_number,
        installation_date: payload.installation_date,
        next_maintenance: payload.next_maintenance,
        status: DeviceStatus::Active,
    };

    match diesel::insert_into(devices::table)
        .values(&new_device)
        .execute(conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("serial number is already in use"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    Ok(devices::table.find(new_device.id).first(conn)?)
}

#[derive(Serialize)]
pub struct DeviceInspectionSummary {
    pub id: Uuid,
    pub inspection_date: NaiveDateTime,
    pub status: InspectionStatus,
    pub inspector_name: String,
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct DeviceTaskSummary {
    pub id: Uuid,
    pub title: String,
    pub priority: crate::domain::TaskPriority,
    pub status: crate::domain::TaskStatus,
    pub scheduled_date: NaiveDateTime,
    pub assigned_user_name: String,
}

#[derive(Serialize)]
pub struct DeviceDetailResponse {
    pub device: DeviceResponse,
    pub can_edit: bool,
    pub recent_inspections: Vec<DeviceInspectionSummary>,
    pub maintenance_tasks: Vec<DeviceTaskSummary>,
}

pub async fn get_device(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(device_id): Path<Uuid>,
) -> AppResult<Json<DeviceDetailResponse>> {
    let mut conn = state.db()?;
    let device: Device = devices::table.find(device_id).first(&mut conn)?;

    let recent_inspections: Vec<(Uuid, NaiveDateTime, InspectionStatus, Option<String>, String)> =
        inspections::table
            .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
            .filter(inspections::device_id.eq(device_id))
            .order(inspections::inspection_date.desc())
            .limit(5)
            .select((
                inspections::id,
                inspections::inspection_date,
                inspections::status,
                inspections::notes,
                users::name,
            ))
            .load(&mut conn)?;

    let tasks: Vec<(
        Uuid,
        String,
        crate::domain::TaskPriority,
        crate::domain::TaskStatus,
        NaiveDateTime,
        String,
    )> = maintenance_tasks::table
        .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
        .filter(maintenance_tasks::device_id.eq(device_id))
        .order(maintenance_tasks::scheduled_date.desc())
        .limit(5)
        .select((
            maintenance_tasks::id,
            maintenance_tasks::title,
            maintenance_tasks::priority,
            maintenance_tasks::status,
            maintenance_tasks::scheduled_date,
            users::name,
        ))
        .load(&mut conn)?;

    Ok(Json(DeviceDetailResponse {
        device: DeviceResponse::from(device),
        can_edit: caller.can_manage_users(),
        recent_inspections: recent_inspections
            .into_iter()
            .map(
                |(id, inspection_date, status, notes, inspector_name)| DeviceInspectionSummary {
                    id,
                    inspection_date,
                    status,
                    inspector_name,
                    notes,
                },
            )
            .collect(),
        maintenance_tasks: tasks
            .into_iter()
            .map(
                |(id, title, priority, status, scheduled_date, assigned_user_name)| {
                    DeviceTaskSummary {
                        id,
                        title,
                        priority,
                        status,
                        scheduled_date,
                        assigned_user_name,
                    }
                },
            )
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<DeviceType>,
    pub location: Option<String>,
    pub serial_number: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub last_maintenance: Option<NaiveDate>,
    pub next_maintenance: Option<NaiveDate>,
    pub status: Option<DeviceStatus>,
}

pub async fn update_device(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(device_id): Path<Uuid>,
    Json(payload): Json<UpdateDeviceRequest>,
) -> AppResult<Json<DeviceResponse>> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to update devices"));
    }

    let mut conn = state.db()?;
    let existing: Device = devices::table.find(device_id).first(&mut conn)?;

    if let Some(ref name) = payload.name {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        diesel::update(devices::table.find(device_id))
            .set(devices::name.eq(trimmed))
            .execute(&mut conn)?;
    }
    if let Some(device_type) = payload.device_type {
        diesel::update(devices::table.find(device_id))
            .set(devices::device_type.eq(device_type))
            .execute(&mut conn)?;
    }
    if let Some(ref location) = payload.location {
        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("location must not be empty"));
        }
        diesel::update(devices::table.find(device_id))
            .set(devices::location.eq(trimmed))
            .execute(&mut conn)?;
    }
    if let Some(ref serial) = payload.serial_number {
        let trimmed = serial.trim();
        if !trimmed.is_empty() && existing.serial_number.as_deref() != Some(trimmed) {
            let duplicate: Option<Device> = devices::table
                .filter(devices::serial_number.eq(trimmed))
                .filter(devices::id.ne(device_id))
                .first(&mut conn)
                .optional()?;
            if duplicate.is_some() {
                return Err(AppError::conflict("serial number is already in use"));
            }
            diesel::update(devices::table.find(device_id))
                .set(devices::serial_number.eq(Some(trimmed.to_string())))
                .execute(&mut conn)?;
        }
    }
    if let Some(installation_date) = payload.installation_date {
        diesel::update(devices::table.find(device_id))
            .set(devices::installation_date.eq(Some(installation_date)))
            .execute(&mut conn)?;
    }
    if let Some(last_maintenance) = payload.last_maintenance {
        diesel::update(devices::table.find(device_id))
            .set(devices::last_maintenance.eq(Some(last_maintenance)))
            .execute(&mut conn)?;
    }
    if let Some(next_maintenance) = payload.next_maintenance {
        diesel::update(devices::table.find(device_id))
            .set(devices::next_maintenance.eq(Some(next_maintenance)))
            .execute(&mut conn)?;
    }
    if let Some(status) = payload.status {
        diesel::update(devices::table.find(device_id))
            .set(devices::status.eq(status))
            .execute(&mut conn)?;
    }

    diesel::update(devices::table.find(device_id))
        .set(devices::updated_at.eq(Utc::now().naive_utc()))
        .execute(&mut conn)?;

    let device: Device = devices::table.find(device_id).first(&mut conn)?;
    Ok(Json(DeviceResponse::from(device)))
}

pub async fn delete_device(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(device_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to delete devices"));
    }

    let mut conn = state.db()?;
    let _: Device = devices::table.find(device_id).first(&mut conn)?;

    let inspection_count: i64 = inspections::table
        .filter(inspections::device_id.eq(device_id))
        .select(count_star())
        .first(&mut conn)?;
    let task_count: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::device_id.eq(device_id))
        .select(count_star())
        .first(&mut conn)?;

    if inspection_count > 0 || task_count > 0 {
        return Err(AppError::conflict(format!(
            "device has {inspection_count} inspections and {task_count} maintenance tasks"
        )));
    }

    diesel::delete(devices::table.find(device_id)).execute(&mut conn)?;
    info!(device_id = %device_id, deleted_by = %caller.id(), "deleted device");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct DeviceTypeEntry {
    pub value: DeviceType,
    pub label: &'static str,
}

#[derive(Serialize)]
pub struct DeviceTypesResponse {
    pub device_types: Vec<DeviceTypeEntry>,
}

pub async fn list_device_types() -> Json<DeviceTypesResponse> {
    Json(DeviceTypesResponse {
        device_types: DeviceType::ALL
            .iter()
            .map(|device_type| DeviceTypeEntry {
                value: *device_type,
                label: device_type.label(),
            })
            .collect(),
    })
}

#[derive(Serialize)]
pub struct DeviceLocationsResponse {
    pub locations: Vec<String>,
}

pub async fn list_device_locations(
    State(state): State<AppState>,
) -> AppResult<Json<DeviceLocationsResponse>> {
    let mut conn = state.db()?;
    let mut locations: Vec<String> = devices::table
        .select(devices::location)
        .distinct()
        .load(&mut conn)?;

    for default in DEFAULT_LOCATIONS {
        if !locations.iter().any(|loc| loc == default) {
            locations.push((*default).to_string());
        }
    }
    locations.sort();

    Ok(Json(DeviceLocationsResponse { locations }))
}

#[derive(Serialize)]
pub struct DistributionEntry<T> {
    pub key: T,
    pub count: i64,
}

#[derive(Serialize)]
pub struct RecentInspectionEntry {
    pub device_name: String,
    pub location: String,
    pub status: InspectionStatus,
    pub inspection_date: NaiveDateTime,
}

#[derive(Serialize)]
pub struct DeviceStatsResponse {
    pub total_devices: i64,
    pub active_devices: i64,
    pub inactive_devices: i64,
    pub upcoming_maintenance: i64,
    pub overdue_maintenance: i64,
    pub type_distribution: Vec<DistributionEntry<DeviceType>>,
    pub location_distribution: Vec<DistributionEntry<String>>,
    pub recent_inspections: Vec<RecentInspectionEntry>,
}

pub async fn device_stats(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<DeviceStatsResponse>> {
    let mut conn = state.db()?;
    let today = Utc::now().date_naive();

    let total_devices: i64 = devices::table.select(count_star()).first(&mut conn)?;
    let active_devices: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .select(count_star())
        .first(&mut conn)?;
    let inactive_devices: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Inactive))
        .select(count_star())
        .first(&mut conn)?;

    let upcoming_maintenance: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .filter(devices::next_maintenance.is_not_null())
        .filter(
            devices::next_maintenance
                .le(today + Duration::days(UPCOMING_MAINTENANCE_WINDOW_DAYS)),
        )
        .select(count_star())
        .first(&mut conn)?;
    let overdue_maintenance: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .filter(devices::next_maintenance.is_not_null())
        .filter(devices::next_maintenance.lt(today))
        .select(count_star())
        .first(&mut conn)?;

    let type_rows: Vec<(DeviceType, i64)> = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .group_by(devices::device_type)
        .select((devices::device_type, count_star()))
        .load(&mut conn)?;

    let location_rows: Vec<(String, i64)> = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .group_by(devices::location)
        .select((devices::location, count_star()))
        .load(&mut conn)?;

    let recent: Vec<(String, String, InspectionStatus, NaiveDateTime)> = inspections::table
        .inner_join(devices::table)
        .order(inspections::inspection_date.desc())
        .limit(10)
        .select((
            devices::name,
            devices::location,
            inspections::status,
            inspections::inspection_date,
        ))
        .load(&mut conn)?;

    Ok(Json(DeviceStatsResponse {
        total_devices,
        active_devices,
        inactive_devices,
        upcoming_maintenance,
        overdue_maintenance,
        type_distribution: type_rows
            .into_iter()
            .map(|(key, count)| DistributionEntry { key, count })
            .collect(),
        location_distribution: location_rows
            .into_iter()
            .map(|(key, count)| DistributionEntry { key, count })
            .collect(),
        recent_inspections: recent
            .into_iter()
            .map(
                |(device_name, location, status, inspection_date)| RecentInspectionEntry {
                    device_name,
                    location,
                    status,
                    inspection_date,
                },
            )
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct BulkCreateDevicesRequest {
    pub devices: Vec<CreateDeviceRequest>,
}

#[derive(Serialize)]
pub struct BulkCreateDevicesResponse {
    pub total_created: usize,
    pub total_errors: usize,
    pub created_devices: Vec<DeviceResponse>,
    pub errors: Vec<String>,
}

pub async fn bulk_create_devices(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<BulkCreateDevicesRequest>,
) -> AppResult<Json<BulkCreateDevicesResponse>> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to create devices"));
    }
    if payload.devices.is_empty() {
        return Err(AppError::bad_request("devices must not be empty"));
    }

    let mut conn = state.db()?;
    let mut created = Vec::new();
    let mut errors = Vec::new();

    for item in payload.devices {
        let name = item.name.clone();
        match insert_device(&mut conn, item) {
            Ok(device) => created.push(DeviceResponse::from(device)),
            Err(err) => errors.push(format!("{name}: {}", err.message())),
        }
    }

    info!(
        created = created.len(),
        failed = errors.len(),
        created_by = %caller.id(),
        "bulk device registration"
    );

    Ok(Json(BulkCreateDevicesResponse {
        total_created: created.len(),
        total_errors: errors.len(),
        created_devices: created,
        errors,
    }))
}
