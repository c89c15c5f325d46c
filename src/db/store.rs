use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{Alert, NewAlert, NewReading, NotificationTarget, Reading, ReadingStats};

/// Failure of a durable-store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Run a store future under `limit`, mapping an elapsed deadline to
/// [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist a validated reading and return it with its assigned id.
    async fn save_reading(&self, reading: NewReading) -> Result<Reading, StoreError>;

    /// The `limit` most recent readings across all devices, newest first.
    async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError>;

    /// All readings for one device, newest first.
    async fn device_readings(&self, device_id: &str) -> Result<Vec<Reading>, StoreError>;

    async fn device_statistics(&self, device_id: &str) -> Result<ReadingStats, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a new alert. `acknowledged` is always stored as `false`.
    async fn save_alert(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    /// All alerts, newest first.
    async fn list_alerts(&self) -> Result<Vec<Alert>, StoreError>;

    async fn unread_count(&self) -> Result<i64, StoreError>;

    /// Mark an alert as acknowledged. `None` if no alert has this id.
    async fn acknowledge_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError>;

    /// Returns `false` if no alert had this id.
    async fn delete_alert(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Most recent `created_at` for every device that has ever alerted.
    async fn last_alert_per_device(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;
}

/// Registry of push-notification targets, one per user.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    async fn list_active_targets(&self) -> Result<Vec<NotificationTarget>, StoreError>;

    /// Insert or replace the token registered for `user_id`.
    async fn upsert_target(
        &self,
        user_id: &str,
        fcm_token: &str,
    ) -> Result<NotificationTarget, StoreError>;

    /// Returns `false` if the user had no registered target.
    async fn remove_target(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Remove every target whose token is in `tokens`; returns how many went.
    async fn remove_tokens(&self, tokens: &[String]) -> Result<u64, StoreError>;
}
