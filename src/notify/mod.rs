//! Push-notification delivery.
//!
//! - [`NotificationDispatcher`] is the per-target send capability.
//! - [`NotificationFanout`] resolves the current targets for an alert and
//!   dispatches to each of them, collecting a [`DispatchReport`].
//! - [`FcmClient`] delivers through Firebase Cloud Messaging; [`LogDispatcher`]
//!   only logs, for deployments without push credentials.

pub mod fanout;
pub mod fcm;
pub mod models;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::models::{Alert, NotificationTarget};

pub use fanout::{DispatchReport, FailedDelivery, FailureReason, NotificationFanout};
pub use fcm::FcmClient;

/// Why a single delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The target will never accept messages again (e.g. an unregistered
    /// push token) and should be removed from the registry.
    #[error("target permanently invalid: {0}")]
    InvalidTarget(String),

    /// Worth retrying later: network trouble, timeouts, quota, 5xx.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// Acknowledgement of a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Provider-assigned message id, when the provider returns one.
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// String-only key/value pairs, as FCM requires.
    pub data: BTreeMap<String, String>,
}

impl NotificationPayload {
    pub fn for_alert(alert: &Alert) -> Self {
        let data = BTreeMap::from([
            ("alert_id".to_owned(), alert.id.to_string()),
            ("device_id".to_owned(), alert.device_id.clone()),
            ("gas_value".to_owned(), alert.gas_value.to_string()),
            ("kind".to_owned(), alert.kind.to_string()),
            ("timestamp".to_owned(), alert.created_at.to_rfc3339()),
        ]);

        Self {
            title: "Gas Leak Alert!".to_owned(),
            body: format!(
                "Device {} detected high LPG: {}",
                alert.device_id, alert.gas_value
            ),
            data,
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        target: &NotificationTarget,
        payload: &NotificationPayload,
    ) -> Result<Ack, DispatchError>;
}

/// Dispatcher that logs each notification and reports it delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(
        &self,
        target: &NotificationTarget,
        payload: &NotificationPayload,
    ) -> Result<Ack, DispatchError> {
        info!(
            user_id = %target.user_id,
            token = %fingerprint(&target.fcm_token),
            title = %payload.title,
            body = %payload.body,
            "Push delivery not configured; notification logged only"
        );
        Ok(Ack::default())
    }
}

/// Short, stable identifier for a push token that is safe to log.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::db::models::AlertKind;

    #[test]
    fn payload_for_alert_names_device_and_value() {
        let alert = Alert {
            id: Uuid::new_v4(),
            device_id: "kitchen".to_owned(),
            kind: AlertKind::GasLeak,
            gas_value: 75.5,
            message: "High LPG level detected: 75.5".to_owned(),
            created_at: Utc::now(),
            acknowledged: false,
        };

        let payload = NotificationPayload::for_alert(&alert);
        assert_eq!(payload.title, "Gas Leak Alert!");
        assert_eq!(payload.body, "Device kitchen detected high LPG: 75.5");
        assert_eq!(payload.data["device_id"], "kitchen");
        assert_eq!(payload.data["gas_value"], "75.5");
        assert_eq!(payload.data["alert_id"], alert.id.to_string());
        assert_eq!(payload.data["kind"], "gas_leak");
    }

    #[test]
    fn fingerprint_is_short_stable_and_hides_the_token() {
        let a = fingerprint("secret-token-value");
        assert_eq!(a.len(), 12);
        assert_eq!(a, fingerprint("secret-token-value"));
        assert_ne!(a, fingerprint("other-token"));
        assert!(!a.contains("secret"));
    }

    #[tokio::test]
    async fn log_dispatcher_always_acks() {
        let target = NotificationTarget {
            user_id: "alice".to_owned(),
            fcm_token: "tok".to_owned(),
            updated_at: Utc::now(),
        };
        let payload = NotificationPayload {
            title: "t".to_owned(),
            body: "b".to_owned(),
            data: BTreeMap::new(),
        };
        assert_eq!(LogDispatcher.send(&target, &payload).await, Ok(Ack::default()));
    }
}
