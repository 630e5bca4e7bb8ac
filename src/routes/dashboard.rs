use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::{DeviceStatus, DeviceType, InspectionStatus, TaskPriority, TaskStatus},
    error::AppResult,
    schema::{devices, inspections, maintenance_tasks, uploaded_files, users},
    state::AppState,
};

const UPCOMING_MAINTENANCE_WINDOW_DAYS: i64 = 30;
const ALERT_MAINTENANCE_WINDOW_DAYS: i64 = 7;
const NOTE_PREVIEW_LENGTH: usize = 100;

fn note_preview(notes: Option<String>) -> Option<String> {
    notes.map(|text| {
        if text.chars().count() > NOTE_PREVIEW_LENGTH {
            let mut preview: String = text.chars().take(NOTE_PREVIEW_LENGTH).collect();
            preview.push_str("...");
            preview
        } else {
            text
        }
    })
}

#[derive(Serialize)]
pub struct BasicStats {
    pub total_devices: i64,
    pub total_users: i64,
    pub today_inspections: i64,
    pub pending_maintenance: i64,
    pub overdue_maintenance: i64,
    pub total_files: i64,
    pub upcoming_maintenance: i64,
}

#[derive(Serialize)]
pub struct CountByStatus<T> {
    pub status: T,
    pub count: i64,
}

#[derive(Serialize)]
pub struct CountByType {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub count: i64,
}

#[derive(Serialize)]
pub struct CountByPriority {
    pub priority: TaskPriority,
    pub count: i64,
}

#[derive(Serialize)]
pub struct LatestInspectionEntry {
    pub id: Uuid,
    pub device_name: String,
    pub inspector_name: String,
    pub status: InspectionStatus,
    pub inspection_date: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct UrgentTaskEntry {
    pub id: Uuid,
    pub title: String,
    pub device_name: String,
    pub assigned_user_name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub scheduled_date: NaiveDateTime,
}

#[derive(Serialize)]
pub struct DashboardStatsResponse {
    pub basic_stats: BasicStats,
    pub device_types: Vec<CountByType>,
    pub inspection_stats: Vec<CountByStatus<InspectionStatus>>,
    pub maintenance_stats: Vec<CountByStatus<TaskStatus>>,
    pub priority_stats: Vec<CountByPriority>,
    pub latest_inspections: Vec<LatestInspectionEntry>,
    pub urgent_tasks: Vec<UrgentTaskEntry>,
}

pub async fn stats(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<DashboardStatsResponse>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let today_start = now.date().and_hms_opt(0, 0, 0).unwrap_or(now);

    let total_devices: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .select(count_star())
        .first(&mut conn)?;
    let total_users: i64 = users::table
        .filter(users::is_active.eq(true))
        .select(count_star())
        .first(&mut conn)?;
    let today_inspections: i64 = inspections::table
        .filter(inspections::inspection_date.ge(today_start))
        .select(count_star())
        .first(&mut conn)?;
    let pending_maintenance: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq_any([TaskStatus::Pending, TaskStatus::InProgress]))
        .select(count_star())
        .first(&mut conn)?;
    let overdue_maintenance: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::Pending))
        .filter(maintenance_tasks::scheduled_date.lt(now))
        .select(count_star())
        .first(&mut conn)?;
    let total_files: i64 = uploaded_files::table.select(count_star()).first(&mut conn)?;
    let upcoming_maintenance: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .filter(devices::next_maintenance.is_not_null())
        .filter(
            devices::next_maintenance
                .le(now.date() + Duration::days(UPCOMING_MAINTENANCE_WINDOW_DAYS)),
        )
        .select(count_star())
        .first(&mut conn)?;

    let device_types: Vec<(DeviceType, i64)> = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .group_by(devices::device_type)
        .select((devices::device_type, count_star()))
        .load(&mut conn)?;

    let week_ago = now - Duration::days(7);
    let inspection_stats: Vec<(InspectionStatus, i64)> = inspections::table
        .filter(inspections::inspection_date.ge(week_ago))
        .group_by(inspections::status)
        .select((inspections::status, count_star()))
        .load(&mut conn)?;

    let maintenance_stats: Vec<(TaskStatus, i64)> = maintenance_tasks::table
        .group_by(maintenance_tasks::status)
        .select((maintenance_tasks::status, count_star()))
        .load(&mut conn)?;

    let priority_stats: Vec<(TaskPriority, i64)> = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq_any([TaskStatus::Pending, TaskStatus::InProgress]))
        .group_by(maintenance_tasks::priority)
        .select((maintenance_tasks::priority, count_star()))
        .load(&mut conn)?;

    let latest: Vec<(Uuid, String, String, InspectionStatus, NaiveDateTime, Option<String>)> =
        inspections::table
            .inner_join(devices::table)
            .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
            .order(inspections::inspection_date.desc())
            .limit(5)
            .select((
                inspections::id,
                devices::name,
                users::name,
                inspections::status,
                inspections::inspection_date,
                inspections::notes,
            ))
            .load(&mut conn)?;

    let urgent: Vec<(Uuid, String, String, String, TaskPriority, TaskStatus, NaiveDateTime)> =
        maintenance_tasks::table
            .inner_join(devices::table)
            .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
            .filter(maintenance_tasks::priority.eq(TaskPriority::Urgent))
            .filter(
                maintenance_tasks::status.eq_any([TaskStatus::Pending, TaskStatus::InProgress]),
            )
            .order(maintenance_tasks::scheduled_date.asc())
            .limit(5)
            .select((
                maintenance_tasks::id,
                maintenance_tasks::title,
                devices::name,
                users::name,
                maintenance_tasks::priority,
                maintenance_tasks::status,
                maintenance_tasks::scheduled_date,
            ))
            .load(&mut conn)?;

    Ok(Json(DashboardStatsResponse {
        basic_stats: BasicStats {
            total_devices,
            total_users,
            today_inspections,
            pending_maintenance,
            overdue_maintenance,
            total_files,
            upcoming_maintenance,
        },
        device_types: device_types
            .into_iter()
            .map(|(device_type, count)| CountByType { device_type, count })
            .collect(),
        inspection_stats: inspection_stats
            .into_iter()
            .map(|(status, count)| CountByStatus { status, count })
            .collect(),
        maintenance_stats: maintenance_stats
            .into_iter()
            .map(|(status, count)| CountByStatus { status, count })
            .collect(),
        priority_stats: priority_stats
            .into_iter()
            .map(|(priority, count)| CountByPriority { priority, count })
            .collect(),
        latest_inspections: latest
            .into_iter()
            .map(
                |(id, device_name, inspector_name, status, inspection_date, notes)| {
                    LatestInspectionEntry {
                        id,
                        device_name,
                        inspector_name,
                        status,
                        inspection_date,
                        notes: note_preview(notes),
                    }
                },
            )
            .collect(),
        urgent_tasks: urgent
            .into_iter()
            .map(
                |(id, title, device_name, assigned_user_name, priority, status, scheduled_date)| {
                    UrgentTaskEntry {
                        id,
                        title,
                        device_name,
                        assigned_user_name,
                        priority,
                        status,
                        scheduled_date,
                    }
                },
            )
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct ActivityEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    pub description: String,
    pub status: String,
    pub timestamp: NaiveDateTime,
    pub user: String,
}

#[derive(Serialize)]
pub struct ActivityResponse {
    pub activities: Vec<ActivityEntry>,
}

pub async fn activity(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
    Query(params): Query<ActivityQuery>,
) -> AppResult<Json<ActivityResponse>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let half = (limit / 2).max(1);
    let mut conn = state.db()?;

    let recent_inspections: Vec<(String, String, InspectionStatus, NaiveDateTime)> =
        inspections::table
            .inner_join(devices::table)
            .inner_join(users::table.on(users::id.eq(inspections::inspector_id)))
            .order(inspections::inspection_date.desc())
            .limit(half)
            .select((
                devices::name,
                users::name,
                inspections::status,
                inspections::inspection_date,
            ))
            .load(&mut conn)?;

    let recent_tasks: Vec<(String, String, String, TaskStatus, NaiveDateTime)> =
        maintenance_tasks::table
            .inner_join(devices::table)
            .inner_join(users::table.on(users::id.eq(maintenance_tasks::assigned_user_id)))
            .order(maintenance_tasks::updated_at.desc())
            .limit(half)
            .select((
                maintenance_tasks::title,
                devices::name,
                users::name,
                maintenance_tasks::status,
                maintenance_tasks::updated_at,
            ))
            .load(&mut conn)?;

    let mut activities: Vec<ActivityEntry> = Vec::new();
    for (device_name, inspector_name, status, timestamp) in recent_inspections {
        activities.push(ActivityEntry {
            kind: "inspection",
            title: format!("Inspection of {device_name}"),
            description: format!("Inspection performed by {inspector_name}"),
            status: status.as_str().to_string(),
            timestamp,
            user: inspector_name,
        });
    }
    for (title, device_name, assigned_user_name, status, timestamp) in recent_tasks {
        activities.push(ActivityEntry {
            kind: "maintenance",
            title,
            description: format!("Maintenance task for {device_name} - {assigned_user_name}"),
            status: status.as_str().to_string(),
            timestamp,
            user: assigned_user_name,
        });
    }

    activities.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    activities.truncate(limit as usize);

    Ok(Json(ActivityResponse { activities }))
}

#[derive(Serialize)]
pub struct AlertEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub severity: &'static str,
    pub title: &'static str,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertEntry>,
    pub total_count: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
}

fn severity_rank(severity: &str) -> u8 {
    match severity {
        "critical" => 0,
        "high" => 1,
        "medium" => 2,
        _ => 3,
    }
}

pub async fn alerts(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<AlertsResponse>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let today = now.date();
    let mut alerts: Vec<AlertEntry> = Vec::new();

    let overdue: Vec<(String, String, NaiveDateTime)> = maintenance_tasks::table
        .inner_join(devices::table)
        .filter(maintenance_tasks::status.eq(TaskStatus::Pending))
        .filter(maintenance_tasks::scheduled_date.lt(now))
        .select((
            maintenance_tasks::title,
            devices::name,
            maintenance_tasks::scheduled_date,
        ))
        .load(&mut conn)?;

    for (title, device_name, scheduled_date) in overdue {
        let days_overdue = (now - scheduled_date).num_days();
        alerts.push(AlertEntry {
            kind: "overdue_maintenance",
            severity: if days_overdue > 7 { "high" } else { "medium" },
            title: "Overdue maintenance",
            message: format!(
                "Maintenance task '{title}' for {device_name} is {days_overdue} days overdue"
            ),
            timestamp: scheduled_date,
        });
    }

    let upcoming: Vec<(String, NaiveDate)> = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .filter(devices::next_maintenance.is_not_null())
        .filter(devices::next_maintenance.gt(today))
        .filter(devices::next_maintenance.le(today + Duration::days(ALERT_MAINTENANCE_WINDOW_DAYS)))
        .select((devices::name, devices::next_maintenance.assume_not_null()))
        .load(&mut conn)?;

    for (device_name, due) in upcoming {
        let days_until = (due - today).num_days();
        alerts.push(AlertEntry {
            kind: "upcoming_maintenance",
            severity: if days_until > 3 { "low" } else { "medium" },
            title: "Upcoming maintenance",
            message: format!("{device_name} is due for maintenance in {days_until} days"),
            timestamp: due.and_hms_opt(0, 0, 0).unwrap_or(now),
        });
    }

    let recent_danger: Vec<(String, NaiveDateTime)> = inspections::table
        .inner_join(devices::table)
        .filter(inspections::status.eq(InspectionStatus::Danger))
        .filter(inspections::inspection_date.ge(now - Duration::days(1)))
        .select((devices::name, inspections::inspection_date))
        .load(&mut conn)?;

    for (device_name, inspection_date) in recent_danger {
        alerts.push(AlertEntry {
            kind: "danger_inspection",
            severity: "critical",
            title: "Dangerous inspection result",
            message: format!("A critical problem was found on {device_name}"),
            timestamp: inspection_date,
        });
    }

    alerts.sort_by(|a, b| {
        severity_rank(a.severity)
            .cmp(&severity_rank(b.severity))
            .then(b.timestamp.cmp(&a.timestamp))
    });

    let count_of = |severity: &str| alerts.iter().filter(|a| a.severity == severity).count();
    Ok(Json(AlertsResponse {
        total_count: alerts.len(),
        critical_count: count_of("critical"),
        high_count: count_of("high"),
        medium_count: count_of("medium"),
        low_count: count_of("low"),
        alerts,
    }))
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub user_summary: UserSummary,
    pub system_health: SystemHealth,
    pub trends: Trends,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub total_inspections: i64,
    pub assigned_tasks: i64,
    pub role: crate::domain::Role,
    pub department: Option<String>,
}

#[derive(Serialize)]
pub struct SystemHealth {
    pub devices_operational: i64,
    pub recent_inspections_good: i64,
    pub maintenance_on_schedule: i64,
}

#[derive(Serialize)]
pub struct Trends {
    pub inspections: InspectionTrend,
}

#[derive(Serialize)]
pub struct InspectionTrend {
    pub current_week: i64,
    pub previous_week: i64,
    pub trend: &'static str,
}

pub async fn summary(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<SummaryResponse>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let total_inspections: i64 = inspections::table
        .filter(inspections::inspector_id.eq(caller.id()))
        .select(count_star())
        .first(&mut conn)?;
    let assigned_tasks: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::assigned_user_id.eq(caller.id()))
        .select(count_star())
        .first(&mut conn)?;

    let devices_operational: i64 = devices::table
        .filter(devices::status.eq(DeviceStatus::Active))
        .select(count_star())
        .first(&mut conn)?;
    let recent_inspections_good: i64 = inspections::table
        .filter(inspections::status.eq(InspectionStatus::Good))
        .filter(inspections::inspection_date.ge(now - Duration::days(7)))
        .select(count_star())
        .first(&mut conn)?;
    let maintenance_on_schedule: i64 = maintenance_tasks::table
        .filter(maintenance_tasks::status.eq(TaskStatus::Completed))
        .filter(
            maintenance_tasks::completed_date
                .assume_not_null()
                .ge(maintenance_tasks::scheduled_date),
        )
        .select(count_star())
        .first(&mut conn)?;

    let current_week: i64 = inspections::table
        .filter(inspections::inspection_date.ge(now - Duration::days(7)))
        .select(count_star())
        .first(&mut conn)?;
    let previous_week: i64 = inspections::table
        .filter(inspections::inspection_date.ge(now - Duration::days(14)))
        .filter(inspections::inspection_date.lt(now - Duration::days(7)))
        .select(count_star())
        .first(&mut conn)?;

    let trend = match current_week.cmp(&previous_week) {
        std::cmp::Ordering::Greater => "up",
        std::cmp::Ordering::Less => "down",
        std::cmp::Ordering::Equal => "stable",
    };

    Ok(Json(SummaryResponse {
        user_summary: UserSummary {
            total_inspections,
            assigned_tasks,
            role: caller.role(),
            department: caller.user.department.clone(),
        },
        system_health: SystemHealth {
            devices_operational,
            recent_inspections_good,
            maintenance_on_schedule,
        },
        trends: Trends {
            inspections: InspectionTrend {
                current_week,
                previous_week,
                trend,
            },
        },
    }))
}

#[derive(Deserialize)]
pub struct InspectionChartQuery {
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Serialize)]
pub struct InspectionChartResponse {
    pub daily_inspections: Vec<DailyCount>,
    pub status_distribution: Vec<CountByStatus<InspectionStatus>>,
}

pub async fn inspections_chart(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
    Query(params): Query<InspectionChartQuery>,
) -> AppResult<Json<InspectionChartResponse>> {
    let days = params.days.unwrap_or(30).clamp(1, 365);
    let start = Utc::now().naive_utc() - Duration::days(days);
    let mut conn = state.db()?;

    let dates: Vec<NaiveDateTime> = inspections::table
        .filter(inspections::inspection_date.ge(start))
        .select(inspections::inspection_date)
        .load(&mut conn)?;
    let mut daily: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for date in dates {
        *daily.entry(date.date()).or_insert(0) += 1;
    }

    let status_rows: Vec<(InspectionStatus, i64)> = inspections::table
        .filter(inspections::inspection_date.ge(start))
        .group_by(inspections::status)
        .select((inspections::status, count_star()))
        .load(&mut conn)?;

    Ok(Json(InspectionChartResponse {
        daily_inspections: daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        status_distribution: status_rows
            .into_iter()
            .map(|(status, count)| CountByStatus { status, count })
            .collect(),
    }))
}

#[derive(Serialize)]
pub struct MonthlyCount {
    pub year: i32,
    pub month: u32,
    pub count: i64,
}

#[derive(Serialize)]
pub struct MaintenanceChartResponse {
    pub status_distribution: Vec<CountByStatus<TaskStatus>>,
    pub priority_distribution: Vec<CountByPriority>,
    pub monthly_trends: Vec<MonthlyCount>,
}

pub async fn maintenance_chart(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<MaintenanceChartResponse>> {
    let mut conn = state.db()?;
    let year_ago = Utc::now().naive_utc() - Duration::days(365);

    let status_rows: Vec<(TaskStatus, i64)> = maintenance_tasks::table
        .group_by(maintenance_tasks::status)
        .select((maintenance_tasks::status, count_star()))
        .load(&mut conn)?;

    let priority_rows: Vec<(TaskPriority, i64)> = maintenance_tasks::table
        .group_by(maintenance_tasks::priority)
        .select((maintenance_tasks::priority, count_star()))
        .load(&mut conn)?;

    let created_dates: Vec<NaiveDateTime> = maintenance_tasks::table
        .filter(maintenance_tasks::created_at.ge(year_ago))
        .select(maintenance_tasks::created_at)
        .load(&mut conn)?;
    let mut monthly: BTreeMap<(i32, u32), i64> = BTreeMap::new();
    for created_at in created_dates {
        *monthly
            .entry((created_at.year(), created_at.month()))
            .or_insert(0) += 1;
    }

    Ok(Json(MaintenanceChartResponse {
        status_distribution: status_rows
            .into_iter()
            .map(|(status, count)| CountByStatus { status, count })
            .collect(),
        priority_distribution: priority_rows
            .into_iter()
            .map(|(priority, count)| CountByPriority { priority, count })
            .collect(),
        monthly_trends: monthly
            .into_iter()
            .map(|((year, month), count)| MonthlyCount { year, month, count })
            .collect(),
    }))
}
