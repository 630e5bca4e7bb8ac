//! Closed domain enumerations and the derived-field rules for the
//! maintenance lifecycle. Every enum is stored as text in Postgres and
//! round-trips through diesel's `Text` SQL type.

use chrono::NaiveDateTime;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("unrecognized {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = std::str::from_utf8(bytes.as_bytes())?;
                raw.parse::<$name>().map_err(|err| err.to_string().into())
            }
        }
    };
}

/// Account roles, ordered roughly by privilege. `can_manage_users` is the
/// capability gate for every administrative mutation in the API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Technician,
    SafetyManager,
    Admin,
    SuperAdmin,
}

text_enum!(Role {
    User => "user",
    Technician => "technician",
    SafetyManager => "safety_manager",
    Admin => "admin",
    SuperAdmin => "super_admin",
});

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Technician => "Maintenance technician",
            Role::SafetyManager => "Safety manager",
            Role::Admin => "Administrator",
            Role::SuperAdmin => "Super administrator",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn is_safety_manager(self) -> bool {
        matches!(self, Role::SafetyManager | Role::Admin | Role::SuperAdmin)
    }

    pub fn can_manage_users(self) -> bool {
        self.is_admin()
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    FireExtinguisher,
    SmokeDetector,
    FireAlarm,
    SprinklerSystem,
    FireHose,
    EmergencyExit,
    EmergencyLighting,
    FireDoor,
    FirePump,
    FirePanel,
}

text_enum!(DeviceType {
    FireExtinguisher => "fire_extinguisher",
    SmokeDetector => "smoke_detector",
    FireAlarm => "fire_alarm",
    SprinklerSystem => "sprinkler_system",
    FireHose => "fire_hose",
    EmergencyExit => "emergency_exit",
    EmergencyLighting => "emergency_lighting",
    FireDoor => "fire_door",
    FirePump => "fire_pump",
    FirePanel => "fire_panel",
});

impl DeviceType {
    pub fn label(self) -> &'static str {
        match self {
            DeviceType::FireExtinguisher => "Fire extinguisher",
            DeviceType::SmokeDetector => "Smoke detector",
            DeviceType::FireAlarm => "Fire alarm",
            DeviceType::SprinklerSystem => "Sprinkler system",
            DeviceType::FireHose => "Fire hose",
            DeviceType::EmergencyExit => "Emergency exit",
            DeviceType::EmergencyLighting => "Emergency lighting",
            DeviceType::FireDoor => "Fire door",
            DeviceType::FirePump => "Fire pump",
            DeviceType::FirePanel => "Fire control panel",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

text_enum!(DeviceStatus {
    Active => "active",
    Inactive => "inactive",
});

/// Flat classification assigned by the inspector; freely reassignable,
/// no transition graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    Good,
    Warning,
    Danger,
}

text_enum!(InspectionStatus {
    Good => "good",
    Warning => "warning",
    Danger => "danger",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

text_enum!(TaskStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

text_enum!(TaskPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

/// A task is overdue while it is still pending past its scheduled date.
/// Derived on every read; never stored.
pub fn is_overdue(status: TaskStatus, scheduled_date: NaiveDateTime, now: NaiveDateTime) -> bool {
    status == TaskStatus::Pending && scheduled_date < now
}

/// Completion timestamp rule: stamped once on the transition into
/// `completed`, kept as-is on every other write. Leaving `completed` does
/// not clear the stamp.
pub fn completion_stamp(
    previous: TaskStatus,
    next: TaskStatus,
    existing: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    if next == TaskStatus::Completed && previous != TaskStatus::Completed {
        Some(now)
    } else {
        existing
    }
}
