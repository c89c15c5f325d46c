use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Send: POST /v1/projects/{project_id}/messages:send
//
// Request:
//   { "message": { "token": "...", "notification": {...}, "data": {...} } }
//
// Success:
//   { "name": "projects/{project_id}/messages/{message_id}" }
//
// Failure (Google API error envelope):
//   { "error": { "code": 404, "message": "...", "status": "NOT_FOUND",
//                "details": [ { "@type": "...FcmError", "errorCode": "UNREGISTERED" } ] } }
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub message: Message<'a>,
}

#[derive(Debug, Serialize)]
pub struct Message<'a> {
    pub token: &'a str,
    pub notification: Notification<'a>,
    #[serde(skip_serializing_if = "no_data")]
    pub data: &'a BTreeMap<String, String>,
}

fn no_data(data: &&BTreeMap<String, String>) -> bool {
    data.is_empty()
}

#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
    /// Fully qualified message name; the id is its last path segment.
    pub name: String,
}

impl SendResponse {
    pub fn message_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: Option<String>,
    /// Canonical Google status, e.g. `"NOT_FOUND"`, `"UNAVAILABLE"`.
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "@type")]
    pub type_url: Option<String>,
    /// FCM-specific code, e.g. `"UNREGISTERED"`, `"QUOTA_EXCEEDED"`.
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

const FCM_ERROR_TYPE: &str = "type.googleapis.com/google.firebase.fcm.v1.FcmError";

impl ErrorBody {
    /// `errorCode` of the `FcmError` detail. Other detail types are ignored.
    pub fn fcm_error_code(&self) -> Option<&str> {
        self.details
            .iter()
            .filter(|d| d.type_url.as_deref() == Some(FCM_ERROR_TYPE))
            .find_map(|d| d.error_code.as_deref())
    }

    /// FCM error code if present, otherwise the canonical status.
    pub fn most_specific_code(&self) -> Option<&str> {
        self.fcm_error_code().or(self.status.as_deref())
    }
}
