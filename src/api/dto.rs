use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    alerts::{Admission, Verdict},
    db::models::{Alert, AlertKind, NotificationTarget, Reading},
    notify::{fingerprint, DispatchReport},
    pipeline::{PipelineOutcome, TerminalState},
    readings::{ReadingSubmission, ValidationError},
};

/// Request body for `POST /api/gas`.
///
/// Field aliases accept the camelCase payload the ESP8266 firmware sends.
/// Fields are taken as raw JSON so that missing or mistyped values are
/// reported as validation errors rather than deserialisation failures.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SubmitReadingRequest {
    #[serde(default, alias = "deviceId")]
    #[schema(value_type = Option<String>)]
    pub device_id: Option<Value>,
    /// Gas concentration (ppm or sensor units).
    #[serde(default, alias = "gasValue")]
    #[schema(value_type = Option<f64>)]
    pub gas_value: Option<Value>,
    /// Device-side classification, e.g. `"SAFE"` or `"DANGER"`.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub status: Option<Value>,
    /// Observation time (RFC 3339). Defaults to the time of receipt.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub timestamp: Option<Value>,
}

impl TryFrom<SubmitReadingRequest> for ReadingSubmission {
    type Error = ValidationError;

    fn try_from(r: SubmitReadingRequest) -> Result<Self, Self::Error> {
        let gas_value = match r.gas_value {
            None => None,
            Some(v) => Some(
                v.as_f64()
                    .ok_or_else(|| ValidationError::NonNumericValue(v.to_string()))?,
            ),
        };
        let observed_at = match r.timestamp {
            None => None,
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| ValidationError::InvalidTimestamp(s.clone()))?
                    .with_timezone(&Utc),
            ),
            Some(other) => return Err(ValidationError::InvalidTimestamp(other.to_string())),
        };

        Ok(Self {
            device_id: text_field("device_id", r.device_id)?,
            gas_value,
            status: text_field("status", r.status)?,
            observed_at,
        })
    }
}

/// Absent fields become empty strings and are rejected by `validate`.
fn text_field(name: &'static str, value: Option<Value>) -> Result<String, ValidationError> {
    match value {
        None => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::NotText(name)),
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub id: Uuid,
    pub device_id: String,
    pub gas_value: f64,
    pub status: String,
    pub observed_at: DateTime<Utc>,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            gas_value: r.gas_value,
            status: r.status,
            observed_at: r.observed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertDto {
    pub id: Uuid,
    pub device_id: String,
    pub kind: AlertKind,
    pub gas_value: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl From<Alert> for AlertDto {
    fn from(a: Alert) -> Self {
        Self {
            id: a.id,
            device_id: a.device_id,
            kind: a.kind,
            gas_value: a.gas_value,
            message: a.message,
            created_at: a.created_at,
            acknowledged: a.acknowledged,
        }
    }
}

/// Response for `POST /api/gas`: which stages ran and what they produced.
#[derive(Debug, Serialize, ToSchema)]
pub struct PipelineResultDto {
    pub state: TerminalState,
    pub reading: ReadingDto,
    pub verdict: Verdict,
    /// Absent when the reading was below the threshold.
    pub admission: Option<Admission>,
    pub alert: Option<AlertDto>,
    pub alert_error: Option<String>,
    pub dispatch: Option<DispatchReport>,
}

impl From<PipelineOutcome> for PipelineResultDto {
    fn from(o: PipelineOutcome) -> Self {
        Self {
            state: o.state,
            reading: o.reading.into(),
            verdict: o.verdict,
            admission: o.admission,
            alert: o.alert.map(Into::into),
            alert_error: o.alert_error,
            dispatch: o.dispatch,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountDto {
    pub unread: i64,
}

/// Request body for `POST /api/tokens`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterTokenRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "fcmToken")]
    pub fcm_token: String,
}

/// A registered push target. The token itself is never returned.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TargetDto {
    pub user_id: String,
    pub token_fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

impl From<NotificationTarget> for TargetDto {
    fn from(t: NotificationTarget) -> Self {
        Self {
            token_fingerprint: fingerprint(&t.fcm_token),
            user_id: t.user_id,
            updated_at: t.updated_at,
        }
    }
}

/// Request body for `POST /api/notifications/test`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TestNotificationRequest {
    pub title: Option<String>,
    pub body: Option<String>,
}
