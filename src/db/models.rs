use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Mirrors the `alert_kind` Postgres enum.
///
/// Only gas leaks are detected today; new categories get a new variant here
/// and a matching `ALTER TYPE alert_kind ADD VALUE` migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "alert_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    GasLeak,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::GasLeak => "gas_leak",
        };
        f.write_str(s)
    }
}

/// A reading that passed ingest validation but has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub device_id: String,
    pub gas_value: f64,
    pub status: String,
    pub observed_at: DateTime<Utc>,
}

/// One stored observation from one device. Immutable once written.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub device_id: String,
    /// Gas concentration as reported by the sensor. No range is enforced.
    pub gas_value: f64,
    /// Free-form label from the device firmware, e.g. `"SAFE"` or `"DANGER"`.
    pub status: String,
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn from_new(id: Uuid, new: NewReading) -> Self {
        Self {
            id,
            device_id: new.device_id,
            gas_value: new.gas_value,
            status: new.status,
            observed_at: new.observed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: String,
    pub kind: AlertKind,
    pub gas_value: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub device_id: String,
    pub kind: AlertKind,
    /// Value of the reading that triggered the alert.
    pub gas_value: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Set by the acknowledge endpoint; always `false` on creation.
    pub acknowledged: bool,
}

impl Alert {
    pub fn from_new(id: Uuid, new: NewAlert) -> Self {
        Self {
            id,
            device_id: new.device_id,
            kind: new.kind,
            gas_value: new.gas_value,
            message: new.message,
            created_at: new.created_at,
            acknowledged: false,
        }
    }
}

/// A push-notification address registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub user_id: String,
    pub fcm_token: String,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate over one device's readings. All zeros when the device has none.
#[derive(Debug, Clone, Copy, PartialEq, Default, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ReadingStats {
    pub count: i64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}
