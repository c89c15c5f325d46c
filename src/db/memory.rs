use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    models::{Alert, NewAlert, NewReading, NotificationTarget, Reading, ReadingStats},
    store::{AlertStore, ReadingStore, StoreError, TargetRegistry},
};

/// Process-local implementation of every store trait.
///
/// Used when no `DATABASE_URL` is configured and by the HTTP tests. Wrapped
/// in `Arc` so clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Insertion order; readings are never mutated.
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
    targets: HashMap<String, NotificationTarget>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first by `observed_at`, ties broken by insertion order (latest first).
fn newest_first(readings: impl DoubleEndedIterator<Item = Reading>) -> Vec<Reading> {
    let mut out: Vec<Reading> = readings.rev().collect();
    out.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
    out
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn save_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let stored = Reading::from_new(Uuid::new_v4(), reading);
        self.inner.write().await.readings.push(stored.clone());
        Ok(stored)
    }

    async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let guard = self.inner.read().await;
        let mut out = newest_first(guard.readings.iter().cloned());
        out.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(out)
    }

    async fn device_readings(&self, device_id: &str) -> Result<Vec<Reading>, StoreError> {
        let guard = self.inner.read().await;
        Ok(newest_first(
            guard
                .readings
                .iter()
                .filter(|r| r.device_id == device_id)
                .cloned(),
        ))
    }

    async fn device_statistics(&self, device_id: &str) -> Result<ReadingStats, StoreError> {
        let guard = self.inner.read().await;
        let values: Vec<f64> = guard
            .readings
            .iter()
            .filter(|r| r.device_id == device_id)
            .map(|r| r.gas_value)
            .collect();

        if values.is_empty() {
            return Ok(ReadingStats::default());
        }

        let sum: f64 = values.iter().sum();
        Ok(ReadingStats {
            count: values.len() as i64,
            avg: sum / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn save_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let stored = Alert::from_new(Uuid::new_v4(), alert);
        self.inner.write().await.alerts.push(stored.clone());
        Ok(stored)
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<Alert> = guard.alerts.iter().rev().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn unread_count(&self) -> Result<i64, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.alerts.iter().filter(|a| !a.acknowledged).count() as i64)
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.alerts.iter_mut().find(|a| a.id == id).map(|a| {
            a.acknowledged = true;
            a.clone()
        }))
    }

    async fn delete_alert(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.alerts.len();
        guard.alerts.retain(|a| a.id != id);
        Ok(guard.alerts.len() != before)
    }

    async fn last_alert_per_device(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let guard = self.inner.read().await;
        let mut latest: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for alert in &guard.alerts {
            latest
                .entry(alert.device_id.as_str())
                .and_modify(|at| *at = (*at).max(alert.created_at))
                .or_insert(alert.created_at);
        }
        Ok(latest
            .into_iter()
            .map(|(device_id, at)| (device_id.to_owned(), at))
            .collect())
    }
}

#[async_trait]
impl TargetRegistry for MemoryStore {
    async fn list_active_targets(&self) -> Result<Vec<NotificationTarget>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<NotificationTarget> = guard.targets.values().cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn upsert_target(
        &self,
        user_id: &str,
        fcm_token: &str,
    ) -> Result<NotificationTarget, StoreError> {
        let target = NotificationTarget {
            user_id: user_id.to_owned(),
            fcm_token: fcm_token.to_owned(),
            updated_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .targets
            .insert(user_id.to_owned(), target.clone());
        Ok(target)
    }

    async fn remove_target(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.targets.remove(user_id).is_some())
    }

    async fn remove_tokens(&self, tokens: &[String]) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.targets.len();
        guard.targets.retain(|_, t| !tokens.contains(&t.fcm_token));
        Ok((before - guard.targets.len()) as u64)
    }
}
