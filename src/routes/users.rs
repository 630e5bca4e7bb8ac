use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{password::hash_password, AuthenticatedUser},
    domain::Role,
    error::{AppError, AppResult},
    models::{NewUser, NewUserProfile, User},
    schema::{autosave_records, user_profiles, user_sessions, users},
    state::AppState,
};

use super::{page_window, Pagination};

const DEFAULT_TEMP_PASSWORD: &str = "temp123456";

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            department: user.department,
            phone: user.phone,
            is_active: user.is_active,
            is_verified: user.is_verified,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct UserListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub pagination: Pagination,
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(params): Query<UserListQuery>,
) -> AppResult<Json<UserListResponse>> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to list users"));
    }

    let (page, per_page) = page_window(params.page, params.per_page);
    let mut conn = state.db()?;

    let mut query = users::table.into_boxed();
    let mut count_query = users::table.select(count_star()).into_boxed();

    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            users::name
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern.clone()))
                .or(users::department.ilike(pattern.clone()).assume_not_null()),
        );
        count_query = count_query.filter(
            users::name
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern.clone()))
                .or(users::department.ilike(pattern).assume_not_null()),
        );
    }
    if let Some(role) = params.role {
        query = query.filter(users::role.eq(role));
        count_query = count_query.filter(users::role.eq(role));
    }
    if let Some(department) = params.department.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(users::department.eq(department.to_string()));
        count_query = count_query.filter(users::department.eq(department.to_string()));
    }
    if let Some(is_active) = params.is_active {
        query = query.filter(users::is_active.eq(is_active));
        count_query = count_query.filter(users::is_active.eq(is_active));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<User> = query
        .order(users::created_at.desc())
        .offset((page - 1) * per_page)
        .limit(per_page)
        .load(&mut conn)?;

    Ok(Json(UserListResponse {
        users: rows.into_iter().map(UserResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub temp_password: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to create users"));
    }

    let email = payload.email.trim().to_lowercase();
    let name = payload.name.trim().to_string();
    if email.is_empty() || name.is_empty() {
        return Err(AppError::bad_request("email and name are required"));
    }
    if !super::auth::is_valid_email(&email) {
        return Err(AppError::bad_request("email is not valid"));
    }

    let temp_password = payload
        .temp_password
        .as_deref()
        .unwrap_or(DEFAULT_TEMP_PASSWORD);

    let user_id = Uuid::new_v4();
    let new_user = NewUser {
        id: user_id,
        email,
        password_hash: hash_password(temp_password)?,
        name,
        role: payload.role.unwrap_or_default(),
        department: payload.department.map(|d| d.trim().to_string()),
        phone: payload.phone.map(|p| p.trim().to_string()),
        is_active: true,
        is_verified: false,
        verification_token: None,
    };

    let mut conn = state.db()?;
    let inserted = conn.transaction::<User, diesel::result::Error, _>(|conn| {
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(conn)?;
        diesel::insert_into(user_profiles::table)
            .values(&NewUserProfile {
                id: Uuid::new_v4(),
                user_id,
            })
            .execute(conn)?;
        users::table.find(user_id).first(conn)
    });

    let user = match inserted {
        Ok(user) => user,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => return Err(AppError::conflict("email is already registered")),
        Err(err) => return Err(AppError::from(err)),
    };

    info!(user_id = %user.id, created_by = %caller.id(), "provisioned user account");

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    if !caller.can_manage_users() && caller.id() != user_id {
        return Err(AppError::forbidden("not allowed to view this user"));
    }

    let mut conn = state.db()?;
    let user: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(user)))
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    if !caller.can_manage_users() && caller.id() != user_id {
        return Err(AppError::forbidden("not allowed to update this user"));
    }

    let mut conn = state.db()?;
    // 404 before attempting any change
    let _: User = users::table.find(user_id).first(&mut conn)?;

    let now = Utc::now().naive_utc();

    if let Some(ref name) = payload.name {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        diesel::update(users::table.find(user_id))
            .set(users::name.eq(trimmed))
            .execute(&mut conn)?;
    }
    if let Some(ref department) = payload.department {
        diesel::update(users::table.find(user_id))
            .set(users::department.eq(Some(department.trim().to_string())))
            .execute(&mut conn)?;
    }
    if let Some(ref phone) = payload.phone {
        diesel::update(users::table.find(user_id))
            .set(users::phone.eq(Some(phone.trim().to_string())))
            .execute(&mut conn)?;
    }

    // Role and activation changes are reserved for managers.
    if caller.can_manage_users() {
        if let Some(role) = payload.role {
            diesel::update(users::table.find(user_id))
                .set(users::role.eq(role))
                .execute(&mut conn)?;
        }
        if let Some(is_active) = payload.is_active {
            if !is_active && caller.id() == user_id {
                return Err(AppError::forbidden("cannot deactivate your own account"));
            }
            diesel::update(users::table.find(user_id))
                .set(users::is_active.eq(is_active))
                .execute(&mut conn)?;
        }
    }

    diesel::update(users::table.find(user_id))
        .set(users::updated_at.eq(now))
        .execute(&mut conn)?;

    let user: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to delete users"));
    }
    if caller.id() == user_id {
        return Err(AppError::forbidden("cannot delete your own account"));
    }

    let mut conn = state.db()?;
    let _: User = users::table.find(user_id).first(&mut conn)?;

    let result = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
        diesel::delete(user_profiles::table.filter(user_profiles::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(user_sessions::table.filter(user_sessions::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(autosave_records::table.filter(autosave_records::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(users::table.find(user_id)).execute(conn)
    });

    match result {
        Ok(_) => {
            info!(user_id = %user_id, deleted_by = %caller.id(), "deleted user account");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ForeignKeyViolation,
            _,
        )) => Err(AppError::conflict(
            "user is still referenced by inspections or maintenance tasks",
        )),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn activate_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    set_active(state, caller, user_id, true).await
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    set_active(state, caller, user_id, false).await
}

#[derive(Deserialize, Default)]
pub struct AdminResetPasswordRequest {
    pub new_password: Option<String>,
}

pub async fn admin_reset_password(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    payload: Option<Json<AdminResetPasswordRequest>>,
) -> AppResult<Json<serde_json::Value>> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to reset passwords"));
    }

    let mut conn = state.db()?;
    let _: User = users::table.find(user_id).first(&mut conn)?;

    let new_password = payload
        .and_then(|Json(body)| body.new_password)
        .unwrap_or_else(|| DEFAULT_TEMP_PASSWORD.to_string());

    diesel::update(users::table.find(user_id))
        .set((
            users::password_hash.eq(hash_password(&new_password)?),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(user_id = %user_id, reset_by = %caller.id(), "password reset by administrator");
    Ok(Json(serde_json::json!({ "temp_password": new_password })))
}

#[derive(Serialize)]
pub struct RoleEntry {
    pub value: Role,
    pub label: &'static str,
}

pub async fn list_roles(_caller: AuthenticatedUser) -> Json<serde_json::Value> {
    let roles: Vec<RoleEntry> = Role::ALL
        .iter()
        .map(|role| RoleEntry {
            value: *role,
            label: role.label(),
        })
        .collect();
    Json(serde_json::json!({ "roles": roles }))
}

/// Departments that always appear in the picker alongside whatever is
/// already recorded on user accounts.
const DEFAULT_DEPARTMENTS: &[&str] = &[
    "Emergency",
    "General administration",
    "Maintenance",
    "Nursing",
    "Physicians",
    "Safety management",
    "Security",
];

pub async fn list_departments(
    State(state): State<AppState>,
    _caller: AuthenticatedUser,
) -> AppResult<Json<serde_json::Value>> {
    let mut conn = state.db()?;
    let known: Vec<Option<String>> = users::table
        .select(users::department)
        .distinct()
        .load(&mut conn)?;

    let mut departments: Vec<String> = known
        .into_iter()
        .flatten()
        .filter(|department| !department.is_empty())
        .collect();
    for default in DEFAULT_DEPARTMENTS {
        if !departments.iter().any(|dept| dept == default) {
            departments.push((*default).to_string());
        }
    }
    departments.sort();

    Ok(Json(serde_json::json!({ "departments": departments })))
}

#[derive(Serialize)]
pub struct RoleCount {
    pub role: Role,
    pub count: i64,
}

#[derive(Serialize)]
pub struct DepartmentCount {
    pub department: String,
    pub count: i64,
}

#[derive(Serialize)]
pub struct UserStatsResponse {
    pub total_users: i64,
    pub active_users: i64,
    pub verified_users: i64,
    pub role_distribution: Vec<RoleCount>,
    pub department_distribution: Vec<DepartmentCount>,
}

pub async fn user_stats(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> AppResult<Json<UserStatsResponse>> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to view user statistics"));
    }


    let mut conn = state.db()?;
    let total_users: i64 = users::table.select(count_star()).first(&mut conn)?;
    let active_users: i64 = users::table
        .filter(users::is_active.eq(true))
        .select(count_star())
        .first(&mut conn)?;
    let verified_users: i64 = users::table
        .filter(users::is_verified.eq(true))
        .select(count_star())
        .first(&mut conn)?;

    let role_rows: Vec<(Role, i64)> = users::table
        .group_by(users::role)
        .select((users::role, count_star()))
        .load(&mut conn)?;

    let department_rows: Vec<(Option<String>, i64)> = users::table
        .filter(users::department.is_not_null())
        .group_by(users::department)
        .select((users::department, count_star()))
        .load(&mut conn)?;

    Ok(Json(UserStatsResponse {
        total_users,
        active_users,
        verified_users,
        role_distribution: role_rows
            .into_iter()
            .map(|(role, count)| RoleCount { role, count })
            .collect(),
        department_distribution: department_rows
            .into_iter()
            .filter_map(|(department, count)| {
                department
                    .filter(|dept| !dept.is_empty())
                    .map(|department| DepartmentCount { department, count })
            })
            .collect(),
    }))
}

async fn set_active(
    state: AppState,
    caller: AuthenticatedUser,
    user_id: Uuid,
    is_active: bool,
) -> AppResult<Json<UserResponse>> {
    if !caller.can_manage_users() {
        return Err(AppError::forbidden("not allowed to manage users"));
    }
    if !is_active && caller.id() == user_id {
        return Err(AppError::forbidden("cannot deactivate your own account"));
    }

    let mut conn = state.db()?;
    let _: User = users::table.find(user_id).first(&mut conn)?;

    diesel::update(users::table.find(user_id))
        .set((
            users::is_active.eq(is_active),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let user: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(user)))
}
