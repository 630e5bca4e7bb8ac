use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{DeviceStatus, DeviceType, InspectionStatus, Role, TaskPriority, TaskStatus};
use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub verification_token: Option<String>,
    pub reset_token: Option<String>,
    pub reset_token_expires: Option<NaiveDateTime>,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub verification_token: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = user_profiles)]
#[diesel(belongs_to(User))]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub preferences: Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_profiles)]
pub struct NewUserProfile {
    pub id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = user_sessions)]
#[diesel(belongs_to(User))]
pub struct UserSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_sessions)]
pub struct NewUserSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = devices)]
pub struct Device {
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

#[derive(Debug, Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice {
    pub id: Uuid,
    pub name: String,
    pub device_type: DeviceType,
    pub location: String,
    pub serial_number: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub next_maintenance: Option<NaiveDate>,
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = inspections)]
#[diesel(belongs_to(Device))]
pub struct Inspection {
    pub id: Uuid,
    pub device_id: Uuid,
    pub inspector_id: Uuid,
    pub inspection_date: NaiveDateTime,
    pub status: InspectionStatus,
    pub notes: Option<String>,
    pub images: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = inspections)]
pub struct NewInspection {
    pub id: Uuid,
    pub device_id: Uuid,
    pub inspector_id: Uuid,
    pub inspection_date: NaiveDateTime,
    pub status: InspectionStatus,
    pub notes: Option<String>,
    pub images: Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = maintenance_tasks)]
#[diesel(belongs_to(Device))]
pub struct MaintenanceTask {
    pub id: Uuid,
    pub device_id: Uuid,
    pub assigned_user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub scheduled_date: NaiveDateTime,
    pub completed_date: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = maintenance_tasks)]
pub struct NewMaintenanceTask {
    pub id: Uuid,
    pub device_id: Uuid,
    pub assigned_user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub scheduled_date: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = uploaded_files)]
pub struct UploadedFile {
    pub id: Uuid,
    pub uploader_id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_path: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
    pub upload_date: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = uploaded_files)]
pub struct NewUploadedFile {
    pub id: Uuid,
    pub uploader_id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_path: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = autosave_records)]
#[diesel(belongs_to(User))]
pub struct AutosaveRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub page_path: String,
    pub data: Value,
    pub saved_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = autosave_records)]
pub struct NewAutosaveRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub page_path: String,
    pub data: Value,
    pub saved_at: NaiveDateTime,
}
