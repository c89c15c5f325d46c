use std::{sync::Arc, time::Duration};

use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::{fingerprint, DispatchError, NotificationDispatcher, NotificationPayload};
use crate::db::{
    models::{Alert, NotificationTarget},
    with_timeout, TargetRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidTarget,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FailedDelivery {
    pub user_id: String,
    /// Raw token, kept for registry cleanup. Never serialised.
    #[serde(skip)]
    pub fcm_token: String,
    pub token_fingerprint: String,
    pub reason: FailureReason,
    pub detail: String,
}

/// Outcome of one fanout. Failures are data, never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedDelivery>,
    /// Set when the target list itself could not be loaded; nothing was
    /// attempted in that case.
    pub registry_error: Option<String>,
}

impl DispatchReport {
    /// Tokens the provider reported as permanently invalid.
    pub fn invalid_tokens(&self) -> Vec<String> {
        self.failed
            .iter()
            .filter(|f| f.reason == FailureReason::InvalidTarget)
            .map(|f| f.fcm_token.clone())
            .collect()
    }
}

/// Delivers one alert to every currently registered target.
#[derive(Clone)]
pub struct NotificationFanout {
    registry: Arc<dyn TargetRegistry>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    /// Maximum in-flight sends per fanout.
    concurrency: usize,
    timeout: Duration,
}

impl NotificationFanout {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    pub async fn dispatch(&self, alert: &Alert) -> DispatchReport {
        self.deliver(&NotificationPayload::for_alert(alert)).await
    }

    /// Send `payload` to every target the registry lists right now.
    ///
    /// Each target is attempted independently with its own timeout; a failed
    /// target never stops the others. Delivery order is unspecified.
    pub async fn deliver(&self, payload: &NotificationPayload) -> DispatchReport {
        let targets =
            match with_timeout(self.timeout, self.registry.list_active_targets()).await {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(error = %e, "Could not load notification targets");
                    return DispatchReport {
                        registry_error: Some(e.to_string()),
                        ..DispatchReport::default()
                    };
                }
            };

        if targets.is_empty() {
            info!("No notification targets registered");
            return DispatchReport::default();
        }

        let attempted = targets.len();
        let outcomes: Vec<(NotificationTarget, Result<(), DispatchError>)> =
            stream::iter(targets)
                .map(|target| async move {
                    let result = self.send_one(&target, payload).await;
                    (target, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut report = DispatchReport {
            attempted,
            ..DispatchReport::default()
        };
        for (target, result) in outcomes {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    let token_fingerprint = fingerprint(&target.fcm_token);
                    warn!(
                        user_id = %target.user_id,
                        token = %token_fingerprint,
                        error = %e,
                        "Notification delivery failed"
                    );
                    let (reason, detail) = match e {
                        DispatchError::InvalidTarget(d) => (FailureReason::InvalidTarget, d),
                        DispatchError::Transient(d) => (FailureReason::Transient, d),
                    };
                    report.failed.push(FailedDelivery {
                        user_id: target.user_id,
                        fcm_token: target.fcm_token,
                        token_fingerprint,
                        reason,
                        detail,
                    });
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            "Notifications dispatched"
        );
        report
    }

    async fn send_one(
        &self,
        target: &NotificationTarget,
        payload: &NotificationPayload,
    ) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.timeout, self.dispatcher.send(target, payload)).await {
            Ok(result) => result.map(|ack| {
                debug!(
                    user_id = %target.user_id,
                    message_id = ack.message_id.as_deref().unwrap_or("-"),
                    "Notification delivered"
                );
            }),
            Err(_) => Err(DispatchError::Transient(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

/// Drop every token the provider reported as permanently invalid.
///
/// Cleanup failures are logged and swallowed; a stale token only costs one
/// more failed delivery on the next fanout.
pub async fn remove_invalid_targets(registry: &dyn TargetRegistry, report: &DispatchReport) {
    let tokens = report.invalid_tokens();
    if tokens.is_empty() {
        return;
    }
    match registry.remove_tokens(&tokens).await {
        Ok(removed) => info!(removed, "Removed invalid notification targets"),
        Err(e) => warn!(error = %e, "Could not remove invalid notification targets"),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        db::{models::AlertKind, MemoryStore, StoreError},
        notify::Ack,
    };

    /// Records every send; fails tokens listed in `failures`.
    #[derive(Default)]
    struct ScriptedDispatcher {
        failures: HashMap<String, DispatchError>,
        hang: Vec<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationDispatcher for ScriptedDispatcher {
        async fn send(
            &self,
            target: &NotificationTarget,
            _payload: &NotificationPayload,
        ) -> Result<Ack, DispatchError> {
            self.sent.lock().unwrap().push(target.fcm_token.clone());
            if self.hang.contains(&target.fcm_token) {
                std::future::pending::<()>().await;
            }
            match self.failures.get(&target.fcm_token) {
                Some(e) => Err(e.clone()),
                None => Ok(Ack::default()),
            }
        }
    }

    struct BrokenRegistry;

    #[async_trait]
    impl TargetRegistry for BrokenRegistry {
        async fn list_active_targets(&self) -> Result<Vec<NotificationTarget>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn upsert_target(&self, _: &str, _: &str) -> Result<NotificationTarget, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn remove_target(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn remove_tokens(&self, _: &[String]) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            device_id: "d1".to_owned(),
            kind: AlertKind::GasLeak,
            gas_value: 75.0,
            message: "High LPG level detected: 75".to_owned(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    async fn registry_with(tokens: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for (i, token) in tokens.iter().enumerate() {
            store.upsert_target(&format!("user{}", i + 1), token).await.unwrap();
        }
        store
    }

    fn fanout(
        registry: Arc<dyn TargetRegistry>,
        dispatcher: Arc<ScriptedDispatcher>,
    ) -> NotificationFanout {
        NotificationFanout::new(registry, dispatcher, 2, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn no_targets_is_an_empty_success() {
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let report = fanout(Arc::new(MemoryStore::new()), dispatcher.clone())
            .dispatch(&alert())
            .await;

        assert_eq!(report, DispatchReport::default());
        assert_eq!(report.attempted, 0);
        assert_eq!(report.succeeded, 0);
        assert!(report.failed.is_empty());
        assert!(dispatcher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let registry = registry_with(&["tok1", "tok2", "tok3"]).await;
        let dispatcher = Arc::new(ScriptedDispatcher {
            failures: HashMap::from([(
                "tok2".to_owned(),
                DispatchError::InvalidTarget("UNREGISTERED".to_owned()),
            )]),
            ..Default::default()
        });

        let report = fanout(Arc::new(registry), dispatcher.clone())
            .dispatch(&alert())
            .await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].user_id, "user2");
        assert_eq!(report.failed[0].reason, FailureReason::InvalidTarget);
        assert_eq!(report.invalid_tokens(), vec!["tok2".to_owned()]);

        let mut sent = dispatcher.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["tok1", "tok2", "tok3"]);
    }

    #[tokio::test]
    async fn transient_failures_are_not_cleanup_candidates() {
        let registry = registry_with(&["tok1", "tok2"]).await;
        let dispatcher = Arc::new(ScriptedDispatcher {
            failures: HashMap::from([
                ("tok1".to_owned(), DispatchError::Transient("HTTP 503".to_owned())),
                (
                    "tok2".to_owned(),
                    DispatchError::InvalidTarget("NOT_FOUND".to_owned()),
                ),
            ]),
            ..Default::default()
        });

        let report = fanout(Arc::new(registry), dispatcher).dispatch(&alert()).await;
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.invalid_tokens(), vec!["tok2".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_hanging_target_times_out_as_transient() {
        let registry = registry_with(&["fast", "stuck"]).await;
        let dispatcher = Arc::new(ScriptedDispatcher {
            hang: vec!["stuck".to_owned()],
            ..Default::default()
        });

        let report = fanout(Arc::new(registry), dispatcher).dispatch(&alert()).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed[0].reason, FailureReason::Transient);
        assert!(report.failed[0].detail.contains("no response"));
    }

    #[tokio::test]
    async fn registry_failure_is_reported_not_raised() {
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let report = fanout(Arc::new(BrokenRegistry), dispatcher.clone())
            .dispatch(&alert())
            .await;

        assert_eq!(report.attempted, 0);
        assert!(report.registry_error.is_some());
        assert!(dispatcher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn targets_are_resolved_on_every_dispatch() {
        let registry = registry_with(&["tok1"]).await;
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let fanout = fanout(Arc::new(registry.clone()), dispatcher);

        assert_eq!(fanout.dispatch(&alert()).await.attempted, 1);
        registry.upsert_target("late-joiner", "tok9").await.unwrap();
        assert_eq!(fanout.dispatch(&alert()).await.attempted, 2);
    }

    #[tokio::test]
    async fn invalid_targets_are_removed_transient_ones_kept() {
        let registry = registry_with(&["tok1", "tok2", "tok3"]).await;
        let dispatcher = Arc::new(ScriptedDispatcher {
            failures: HashMap::from([
                ("tok1".to_owned(), DispatchError::Transient("HTTP 500".to_owned())),
                (
                    "tok3".to_owned(),
                    DispatchError::InvalidTarget("UNREGISTERED".to_owned()),
                ),
            ]),
            ..Default::default()
        });

        let report = fanout(Arc::new(registry.clone()), dispatcher).dispatch(&alert()).await;
        remove_invalid_targets(&registry, &report).await;

        let mut tokens: Vec<String> = registry
            .list_active_targets()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.fcm_token)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["tok1", "tok2"]);
    }

    #[test]
    fn serialised_report_hides_raw_tokens() {
        let report = DispatchReport {
            attempted: 1,
            succeeded: 0,
            failed: vec![FailedDelivery {
                user_id: "u".to_owned(),
                fcm_token: "raw-secret".to_owned(),
                token_fingerprint: fingerprint("raw-secret"),
                reason: FailureReason::InvalidTarget,
                detail: "UNREGISTERED".to_owned(),
            }],
            registry_error: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("raw-secret"));
        assert!(json.contains("invalid_target"));
    }
}
