use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{
    fingerprint,
    models::{ErrorResponse, Message, Notification, SendRequest, SendResponse},
    Ack, DispatchError, NotificationDispatcher, NotificationPayload,
};
use crate::{config::FcmConfig, db::models::NotificationTarget};

/// Firebase Cloud Messaging HTTP v1 client.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct FcmClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    /// `{base_url}/v1/projects/{project_id}/messages:send`
    send_url: String,
    access_token: String,
}

impl FcmClient {
    pub fn new(config: &FcmConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build FCM HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                send_url: format!(
                    "{}/v1/projects/{}/messages:send",
                    config.base_url.trim_end_matches('/'),
                    config.project_id
                ),
                access_token: config.access_token.clone(),
            }),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for FcmClient {
    async fn send(
        &self,
        target: &NotificationTarget,
        payload: &NotificationPayload,
    ) -> Result<Ack, DispatchError> {
        let body = SendRequest {
            message: Message {
                token: &target.fcm_token,
                notification: Notification {
                    title: &payload.title,
                    body: &payload.body,
                },
                data: &payload.data,
            },
        };

        debug!(user_id = %target.user_id, token = %fingerprint(&target.fcm_token), "Sending FCM message");

        let response = self
            .inner
            .http
            .post(&self.inner.send_url)
            .bearer_auth(&self.inner.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transient(format!("FCM request failed: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transient(format!("failed to read FCM response: {e}")))?;

        if !status.is_success() {
            return Err(classify(status, &bytes));
        }

        let message_id = serde_json::from_slice::<SendResponse>(&bytes)
            .ok()
            .map(|r| r.message_id().to_owned());
        Ok(Ack { message_id })
    }
}

/// FCM error code meaning the token will never work again.
const UNREGISTERED: &str = "UNREGISTERED";

/// Map a non-2xx FCM response to a [`DispatchError`].
///
/// Only a 404 or an `UNREGISTERED` FCM error marks the target invalid.
/// `INVALID_ARGUMENT` is ambiguous between a bad token and a bad message, so
/// it stays transient along with auth, quota, 5xx and unparseable bodies.
pub(crate) fn classify(status: StatusCode, body: &[u8]) -> DispatchError {
    let parsed = serde_json::from_slice::<ErrorResponse>(body).ok();
    let error = parsed.as_ref().map(|r| &r.error);
    let code = error.and_then(|e| e.most_specific_code());
    let message = error.and_then(|e| e.message.as_deref()).unwrap_or_default();

    let detail = match code {
        Some(code) => format!("HTTP {} {code}: {message}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    };

    let permanent = status == StatusCode::NOT_FOUND
        || error.and_then(|e| e.fcm_error_code()) == Some(UNREGISTERED);

    if permanent {
        DispatchError::InvalidTarget(detail)
    } else {
        DispatchError::Transient(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_body(code: u16, status: &str, fcm_code: Option<&str>) -> Vec<u8> {
        let details = match fcm_code {
            Some(c) => serde_json::json!([{
                "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                "errorCode": c
            }]),
            None => serde_json::json!([]),
        };
        serde_json::to_vec(&serde_json::json!({
            "error": { "code": code, "message": "msg", "status": status, "details": details }
        }))
        .unwrap()
    }

    #[test]
    fn unregistered_token_is_invalid() {
        let body = error_body(404, "NOT_FOUND", Some("UNREGISTERED"));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, &body),
            DispatchError::InvalidTarget(d) if d.contains("UNREGISTERED")
        ));
    }

    #[test]
    fn unregistered_on_bad_request_is_invalid() {
        let body = error_body(400, "INVALID_ARGUMENT", Some("UNREGISTERED"));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, &body),
            DispatchError::InvalidTarget(_)
        ));
    }

    #[test]
    fn invalid_argument_keeps_the_token() {
        let body = error_body(400, "INVALID_ARGUMENT", Some("INVALID_ARGUMENT"));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, &body),
            DispatchError::Transient(d) if d.contains("INVALID_ARGUMENT")
        ));

        // Oversized or malformed message: canonical status only, no FCM detail.
        let body = error_body(400, "INVALID_ARGUMENT", None);
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, &body),
            DispatchError::Transient(_)
        ));
    }

    #[test]
    fn bare_404_is_invalid() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, b"not json"),
            DispatchError::InvalidTarget(_)
        ));
    }

    #[test]
    fn server_errors_and_quota_are_transient() {
        let body = error_body(503, "UNAVAILABLE", None);
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, &body),
            DispatchError::Transient(_)
        ));

        let body = error_body(429, "RESOURCE_EXHAUSTED", Some("QUOTA_EXCEEDED"));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, &body),
            DispatchError::Transient(_)
        ));
    }

    #[test]
    fn auth_failure_is_transient() {
        let body = error_body(401, "UNAUTHENTICATED", Some("THIRD_PARTY_AUTH_ERROR"));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, &body),
            DispatchError::Transient(_)
        ));
    }

    #[test]
    fn send_url_is_built_from_config() {
        let client = FcmClient::new(
            &FcmConfig {
                base_url: "https://fcm.example.test/".to_owned(),
                project_id: "gas-detector".to_owned(),
                access_token: "ya29.token".to_owned(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.inner.send_url,
            "https://fcm.example.test/v1/projects/gas-detector/messages:send"
        );
    }
}
