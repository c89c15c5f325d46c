use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    models::{Alert, NewAlert, NewReading, NotificationTarget, Reading, ReadingStats},
    store::{AlertStore, ReadingStore, StoreError, TargetRegistry},
};

/// Postgres-backed implementation of every store trait.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn save_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let row = sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO gas_readings (id, device_id, gas_value, status, observed_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, device_id, gas_value, status, observed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&reading.device_id)
        .bind(reading.gas_value)
        .bind(&reading.status)
        .bind(reading.observed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn recent_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, device_id, gas_value, status, observed_at
            FROM gas_readings
            ORDER BY observed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn device_readings(&self, device_id: &str) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, device_id, gas_value, status, observed_at
            FROM gas_readings
            WHERE device_id = $1
            ORDER BY observed_at DESC
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn device_statistics(&self, device_id: &str) -> Result<ReadingStats, StoreError> {
        // Aggregates over an empty set are NULL; COALESCE keeps the
        // all-zeros contract for devices without readings.
        let stats = sqlx::query_as::<_, ReadingStats>(
            r#"
            SELECT COUNT(*)                       AS count,
                   COALESCE(AVG(gas_value), 0.0)  AS avg,
                   COALESCE(MIN(gas_value), 0.0)  AS min,
                   COALESCE(MAX(gas_value), 0.0)  AS max
            FROM gas_readings
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn save_alert(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        let row = sqlx::query_as::<_, Alert>(
            r#"
            INSERT INTO alerts (id, device_id, kind, gas_value, message, created_at, acknowledged)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE)
            RETURNING id, device_id, kind, gas_value, message, created_at, acknowledged
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&alert.device_id)
        .bind(alert.kind)
        .bind(alert.gas_value)
        .bind(&alert.message)
        .bind(alert.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, device_id, kind, gas_value, message, created_at, acknowledged
            FROM alerts
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn unread_count(&self) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE acknowledged = FALSE")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts
            SET acknowledged = TRUE
            WHERE id = $1
            RETURNING id, device_id, kind, gas_value, message, created_at, acknowledged
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete_alert(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn last_alert_per_device(&self) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            r#"
            SELECT device_id, MAX(created_at)
            FROM alerts
            GROUP BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl TargetRegistry for PgStore {
    async fn list_active_targets(&self) -> Result<Vec<NotificationTarget>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationTarget>(
            r#"
            SELECT user_id, fcm_token, updated_at
            FROM notification_targets
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn upsert_target(
        &self,
        user_id: &str,
        fcm_token: &str,
    ) -> Result<NotificationTarget, StoreError> {
        let row = sqlx::query_as::<_, NotificationTarget>(
            r#"
            INSERT INTO notification_targets (user_id, fcm_token)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET fcm_token = EXCLUDED.fcm_token, updated_at = now()
            RETURNING user_id, fcm_token, updated_at
            "#,
        )
        .bind(user_id)
        .bind(fcm_token)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn remove_target(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notification_targets WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_tokens(&self, tokens: &[String]) -> Result<u64, StoreError> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM notification_targets WHERE fcm_token = ANY($1)")
            .bind(tokens)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
