use std::collections::BTreeMap;

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
    domain::{self, TaskPriority, TaskStatus},
    error::{AppError, AppResult},
    models::{Device, MaintenanceTask, NewMaintenanceTask, User},
    schema::{devices, maintenance_tasks, users},
    state::AppState,
};

use super::{page_window, Pagination};

const DEFAULT_SCHEDULE_WINDOW_DAYS: i64 = 30;

#[derive(Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub device_id: Uuid,
    pub device_name: String,
    pub device_location: String,
    pub assigned_user_id: Uuid,
    pub assigned_user_name: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub scheduled_date: NaiveDateTime,
    pub completed_date: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub is_overdue: bool,
    pub can_edit: bool,
}

fn to_response(
    task: MaintenanceTask,
    device_name: String,
    device_location: String,
    assigned_user_name: String,
    caller: &AuthenticatedUser,
    now: NaiveDateTime,
) -> TaskResponse {
    let is_overdue = domain::is_overdue(task.status, task.scheduled_date, now);
    let can_edit = task.assigned_user_id == caller.id() || caller.can_manage_users();
    TaskResponse {
        id: task.id,
        device_id: task.device_id,
        device_name,
        device_location,
        assigned_user_id: task.assigned_user_id,
        assigned_user_name,
        title: task.title,
        description: task.description,
        priority: task.priority,
        status: task.status,
        scheduled_date: task.scheduled_date,
        completed_date: task.completed_date,
        notes: task.notes,
        created_at: task.created_at,
        updated_at: task.updated_at,
        is_overdue,
        can_edit,
    }
}

fn load_task_with_names(
    conn: &mut PgConnection,
    task_id: Uuid,
) -> Result<(MaintenanceTask, String, String, String), diesel::result::Error> {
    maintenance_tasks::table
        .inner_join(devices::table)
        .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
        .filter(maintenance_tasks::id.eq(task_id))
        .select((
            maintenance_tasks::all_columns,
            devices::name,
            devices::location,
            users::name,
        ))
        .first(conn)
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub device_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_user_id: Option<Uuid>,
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub pagination: Pagination,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<TaskListQuery>,
) -> AppResult<Json<TaskListResponse>> {
    let (page, per_page) = page_window(params.page, params.per_page);
    let mut conn = state.db()?;

    let mut query = maintenance_tasks::table
        .inner_join(devices::table)
        .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
        .select((
            maintenance_tasks::all_columns,
            devices::name,
            devices::location,
            users::name,
        ))
        .into_boxed();
    let mut count_query = maintenance_tasks::table.select(count_star()).into_boxed();

    if let Some(device_id) = params.device_id {
        query = query.filter(maintenance_tasks::device_id.eq(device_id));
        count_query = count_query.filter(maintenance_tasks::device_id.eq(device_id));
    }
    if let Some(status) = params.status {
        query = query.filter(maintenance_tasks::status.eq(status));
        count_query = count_query.filter(maintenance_tasks::status.eq(status));
    }
    if let Some(priority) = params.priority {
        query = query.filter(maintenance_tasks::priority.eq(priority));
        count_query = count_query.filter(maintenance_tasks::priority.eq(priority));
    }
    if let Some(assigned_user_id) = params.assigned_user_id {
        query = query.filter(maintenance_tasks::assigned_user_id.eq(assigned_user_id));
        count_query = count_query.filter(maintenance_tasks::assigned_user_id.eq(assigned_user_id));
    }
    if let Some(from) = params.date_from {
        query = query.filter(maintenance_tasks::scheduled_date.ge(from));
        count_query = count_query.filter(maintenance_tasks::scheduled_date.ge(from));
    }
    if let Some(to) = params.date_to {
        query = query.filter(maintenance_tasks::scheduled_date.le(to));
        count_query = count_query.filter(maintenance_tasks::scheduled_date.le(to));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<(MaintenanceTask, String, String, String)> = query
        .order(maintenance_tasks::scheduled_date.asc())
        .offset((page - 1) * per_page)
        .limit(per_page)
        .load(&mut conn)?;

    let now = Utc::now().naive_utc();
    Ok(Json(TaskListResponse {
        tasks: rows
            .into_iter()
            .map(|(task, device_name, device_location, assigned_user_name)| {
                to_response(
                    task,
                    device_name,
                    device_location,
                    assigned_user_name,
                    &caller,
                    now,
                )
            })
            .collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub device_id: Uuid,
    pub assigned_user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub scheduled_date: Option<NaiveDateTime>,
}

pub async fn create_task(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<TaskResponse>)> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }

    let mut conn = state.db()?;
    let device: Option<Device> = devices::table
        .find(payload.device_id)
        .first(&mut conn)
        .optional()?;
    let device = device.ok_or_else(AppError::not_found)?;

    let assignee: Option<User> = users::table
        .find(payload.assigned_user_id)
        .first(&mut conn)
        .optional()?;
    let assignee = assignee.ok_or_else(AppError::not_found)?;

    let now = Utc::now().naive_utc();
    let new_task = NewMaintenanceTask {
        id: Uuid::new_v4(),
        device_id: device.id,
        assigned_user_id: assignee.id,
        title,
        description: payload.description,
        priority: payload.priority.unwrap_or(TaskPriority::Medium),
        status: TaskStatus::Pending,
        scheduled_date: payload
            .scheduled_date
            .unwrap_or_else(|| now + Duration::days(1)),
    };

    diesel::insert_into(maintenance_tasks::table)
        .values(&new_task)
        .execute(&mut conn)?;

    let task: MaintenanceTask = maintenance_tasks::table
        .find(new_task.id)
        .first(&mut conn)?;
    info!(
        task_id = %task.id,
        device_id = %device.id,
        assigned_to = %assignee.id,
        "created maintenance task"
    );

    Ok((
        StatusCode::CREATED,
        Json(to_response(
            task,
            device.name,
            device.location,
            assignee.name,
            &caller,
            now,
        )),
    ))
}

pub async fn get_task(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let (task, device_name, device_location, assigned_user_name) =
        load_task_with_names(&mut conn, task_id)?;

    Ok(Json(to_response(
        task,
        device_name,
        device_location,
        assigned_user_name,
        &caller,
        Utc::now().naive_utc(),
    )))
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub notes: Option<String>,
    pub scheduled_date: Option<NaiveDateTime>,
    pub assigned_user_id: Option<Uuid>,
}

pub async fn update_task(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let existing: MaintenanceTask = maintenance_tasks::table.find(task_id).first(&mut conn)?;

    if existing.assigned_user_id != caller.id() && !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to update this task"));
    }

    let now = Utc::now().naive_utc();

    if let Some(ref title) = payload.title {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
        diesel::update(maintenance_tasks::table.find(task_id))
            .set(maintenance_tasks::title.eq(trimmed))
            .execute(&mut conn)?;
    }
    if let Some(description) = payload.description {
        diesel::update(maintenance_tasks::table.find(task_id))
            .set(maintenance_tasks::description.eq(Some(description)))
            .execute(&mut conn)?;
    }
    if let Some(priority) = payload.priority {
        diesel::update(maintenance_tasks::table.find(task_id))
            .set(maintenance_tasks::priority.eq(priority))
            .execute(&mut conn)?;
    }
    if let Some(status) = payload.status {
        // Any status may be written; only the completion stamp is derived.
        let completed_date =
            domain::completion_stamp(existing.status, status, existing.completed_date, now);
        diesel::update(maintenance_tasks::table.find(task_id))
            .set((
                maintenance_tasks::status.eq(status),
                maintenance_tasks::completed_date.eq(completed_date),
            ))
            .execute(&mut conn)?;
    }
    if let Some(notes) = payload.notes {
        diesel::update(maintenance_tasks::table.find(task_id))
            .set(maintenance_tasks::notes.eq(Some(notes)))
            .execute(&mut conn)?;
    }
    if let Some(scheduled_date) = payload.scheduled_date {
        diesel::update(maintenance_tasks::table.find(task_id))
            .set(maintenance_tasks::scheduled_date.eq(scheduled_date))
            .execute(&mut conn)?;
    }
    if let Some(assigned_user_id) = payload.assigned_user_id {
        if assigned_user_id != existing.assigned_user_id {
            if !caller.can_manage_users() {
                return Err(AppError::forbidden("not allowed to reassign tasks"));
            }
            let assignee: Option<User> = users::table
                .find(assigned_user_id)
                .first(&mut conn)
                .optional()?;
            if assignee.is_none() {
                return Err(AppError::not_found());
            }
            diesel::update(maintenance_tasks::table.find(task_id))
                .set(maintenance_tasks::assigned_user_id.eq(assigned_user_id))
                .execute(&mut conn)?;
        }
    }

    diesel::update(maintenance_tasks::table.find(task_id))
        .set(maintenance_tasks::updated_at.eq(now))
        .execute(&mut conn)?;

    let (task, device_name, device_location, assigned_user_name) =
        load_task_with_names(&mut conn, task_id)?;

    Ok(Json(to_response(
        task,
        device_name,
        device_location,
        assigned_user_name,
        &caller,
        now,
    )))
}

pub async fn delete_task(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to delete tasks"));
    }

    let mut conn = state.db()?;
    let _: MaintenanceTask = maintenance_tasks::table.find(task_id).first(&mut conn)?;
    diesel::delete(maintenance_tasks::table.find(task_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct PriorityCount {
    pub priority: TaskPriority,
    pub count: i64,
}

#[derive(Serialize)]
pub struct UserPerformance {
    pub user: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_rate: f64,
}

#[derive(Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Serialize)]
pub struct TopDevice {
    pub device_name: String,
    pub location: String,
    pub maintenance_count: i64,
}

#[derive(Serialize)]
pub struct TaskStatsResponse {
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub completed_tasks: i64,
    pub overdue_tasks: i64,
    pub completion_rate: f64,
    pub priority_distribution: Vec<PriorityCount>,
    pub user_performance: Vec<UserPerformance>,
    pub weekly_trend: Vec<DailyCount>,
    pub top_devices: Vec<TopDevice>,
}

fn rate(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 1000.0).round() / 10.0
    }
}

pub async fn task_stats(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<TaskStatsResponse>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let total_tasks: i64 = maintenance_tasks::table
        .select(count_star())
        .first(&mut conn)?;
    let pending_tasks: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::Pending))
        .select(count_star())
        .first(&mut conn)?;
    let in_progress_tasks: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::InProgress))
        .select(count_star())
        .first(&mut conn)?;
    let completed_tasks: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::Completed))
        .select(count_star())
        .first(&mut conn)?;
    let overdue_tasks: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::Pending))
        .filter(maintenance_tasks::scheduled_date.lt(now))
        .select(count_star())
        .first(&mut conn)?;

    let priority_rows: Vec<(TaskPriority, i64)> = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq_any([TaskStatus::Pending, TaskStatus::InProgress]))
        .group_by(maintenance_tasks::priority)
        .select((maintenance_tasks::priority, count_star()))
        .load(&mut conn)?;

    let totals_by_user: Vec<(Uuid, String, i64)> = maintenance_tasks::table
        .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
        .group_by((users::id, users::name))
        .select((users::id, users::name, count_star()))
        .load(&mut conn)?;
    let completed_by_user: Vec<(Uuid, i64)> = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::Completed))
        .group_by(maintenance_tasks::assigned_user_id)
        .select((maintenance_tasks::assigned_user_id, count_star()))
        .load(&mut conn)?;
    let completed_map: BTreeMap<Uuid, i64> = completed_by_user.into_iter().collect();

    let week_ago = now - Duration::days(7);
    let recent_created: Vec<NaiveDateTime> = maintenance_tasks::table
        .filter(maintenance_tasks::created_at.ge(week_ago))
        .select(maintenance_tasks::created_at)
        .load(&mut conn)?;
    let mut daily: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for created_at in recent_created {
        *daily.entry(created_at.date()).or_insert(0) += 1;
    }

    let top_rows: Vec<(String, String, i64)> = maintenance_tasks::table
        .inner_join(devices::table)
        .group_by((devices::id, devices::name, devices::location))
        .select((devices::name, devices::location, count_star()))
        .order(count_star().desc())
        .limit(10)
        .load(&mut conn)?;

    Ok(Json(TaskStatsResponse {
        total_tasks,
        pending_tasks,
        in_progress_tasks,
        completed_tasks,
        overdue_tasks,
        completion_rate: rate(completed_tasks, total_tasks),
        priority_distribution: priority_rows
            .into_iter()
            .map(|(priority, count)| PriorityCount { priority, count })
            .collect(),
        user_performance: totals_by_user
            .into_iter()
            .map(|(user_id, name, total)| {
                let completed = completed_map.get(&user_id).copied().unwrap_or(0);
                UserPerformance {
                    user: name,
                    total_tasks: total,
                    completed_tasks: completed,
                    completion_rate: rate(completed, total),
                }
            })
            .collect(),
        weekly_trend: daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        top_devices: top_rows
            .into_iter()
            .map(|(device_name, location, maintenance_count)| TopDevice {
                device_name,
                location,
                maintenance_count,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct BulkCreateTasksRequest {
    pub tasks: Vec<CreateTaskRequest>,
}

#[derive(Serialize)]
pub struct BulkCreateTasksResponse {
    pub total_created: usize,
    pub total_errors: usize,
    pub errors: Vec<String>,
}

pub async fn bulk_create_tasks(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
    Json(payload): Json<BulkCreateTasksRequest>,
) -> AppResult<Json<BulkCreateTasksResponse>> {
    if payload.tasks.is_empty() {
        return Err(AppError::bad_request("tasks must not be empty"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut created = 0usize;
    let mut errors = Vec::new();

    for item in payload.tasks {
        let title = item.title.trim().to_string();
        if title.is_empty() {
            errors.push("title is required".to_string());
            continue;
        }
        let device: Option<Device> = devices::table
            .find(item.device_id)
            .first(&mut conn)
            .optional()?;
        if device.is_none() {
            errors.push(format!("device {} does not exist", item.device_id));
            continue;
        }
        let assignee: Option<User> = users::table
            .find(item.assigned_user_id)
            .first(&mut conn)
            .optional()?;
        if assignee.is_none() {
            errors.push(format!("user {} does not exist", item.assigned_user_id));
            continue;
        }

        let new_task = NewMaintenanceTask {
            id: Uuid::new_v4(),
            device_id: item.device_id,
            assigned_user_id: item.assigned_user_id,
            title,
            description: item.description,
            priority: item.priority.unwrap_or(TaskPriority::Medium),
            status: TaskStatus::Pending,
            scheduled_date: item.scheduled_date.unwrap_or(now + Duration::days(1)),
        };
        diesel::insert_into(maintenance_tasks::table)
            .values(&new_task)
            .execute(&mut conn)?;
        created += 1;
    }

    info!(created, failed = errors.len(), "bulk maintenance scheduling");
    Ok(Json(BulkCreateTasksResponse {
        total_created: created,
        total_errors: errors.len(),
        errors,
    }))
}

#[derive(Deserialize)]
pub struct ScheduleQuery {
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub title: String,
    pub device_name: String,
    pub device_location: String,
    pub assigned_user_name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub scheduled_date: NaiveDateTime,
    pub is_overdue: bool,
}

#[derive(Serialize)]
pub struct ScheduleResponse {
    pub schedule: Vec<ScheduleEntry>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub total_tasks: usize,
}

pub async fn schedule(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
    Query(params): Query<ScheduleQuery>,
) -> AppResult<Json<ScheduleResponse>> {
    let now = Utc::now().naive_utc();
    let start = params.start_date.unwrap_or(now);
    let end = params
        .end_date
        .unwrap_or(start + Duration::days(DEFAULT_SCHEDULE_WINDOW_DAYS));

    let mut conn = state.db()?;
    let rows: Vec<(MaintenanceTask, String, String, String)> = maintenance_tasks::table
        .inner_join(devices::table)
        .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
        .filter(maintenance_tasks::scheduled_date.ge(start))
        .filter(maintenance_tasks::scheduled_date.le(end))
        .order(maintenance_tasks::scheduled_date.asc())
        .select((
            maintenance_tasks::all_columns,
            devices::name,
            devices::location,
            users::name,
        ))
        .load(&mut conn)?;

    let schedule: Vec<ScheduleEntry> = rows
        .into_iter()
        .map(|(task, device_name, device_location, assigned_user_name)| ScheduleEntry {
            id: task.id,
            title: task.title,
            device_name,
            device_location,
            assigned_user_name,
            priority: task.priority,
            status: task.status,
            is_overdue: domain::is_overdue(task.status, task.scheduled_date, now),
            scheduled_date: task.scheduled_date,
        })
        .collect();

    Ok(Json(ScheduleResponse {
        total_tasks: schedule.len(),
        schedule,
        start_date: start,
        end_date: end,
    }))
}
