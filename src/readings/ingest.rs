use chrono::{DateTime, Utc};

use crate::db::models::NewReading;

/// A reading as submitted by a device, before validation.
#[derive(Debug, Clone, Default)]
pub struct ReadingSubmission {
    pub device_id: String,
    pub gas_value: Option<f64>,
    pub status: String,
    /// Device-side timestamp; the ingest time is used when absent.
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("device_id is required")]
    MissingDeviceId,

    #[error("gas_value is required")]
    MissingValue,

    #[error("gas_value must be a number, got {0}")]
    NonNumericValue(String),

    #[error("gas_value must be a finite number, got {0}")]
    NonFiniteValue(f64),

    #[error("status is required")]
    MissingStatus,

    #[error("{0} must be a string")]
    NotText(&'static str),

    #[error("timestamp must be an RFC 3339 date-time, got {0}")]
    InvalidTimestamp(String),
}

/// Validate and normalise a submission into a storable reading.
///
/// `device_id` and `status` are trimmed before the emptiness check. No range
/// check is applied to the value: out-of-range readings are exactly what the
/// alert logic exists to catch.
pub fn validate(
    submission: ReadingSubmission,
    now: DateTime<Utc>,
) -> Result<NewReading, ValidationError> {
    let device_id = submission.device_id.trim();
    if device_id.is_empty() {
        return Err(ValidationError::MissingDeviceId);
    }

    let gas_value = submission.gas_value.ok_or(ValidationError::MissingValue)?;
    if !gas_value.is_finite() {
        return Err(ValidationError::NonFiniteValue(gas_value));
    }

    let status = submission.status.trim();
    if status.is_empty() {
        return Err(ValidationError::MissingStatus);
    }

    Ok(NewReading {
        device_id: device_id.to_owned(),
        gas_value,
        status: status.to_owned(),
        observed_at: submission.observed_at.unwrap_or(now),
    })
}
