use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    clock::Clock,
    db::{
        models::{Alert, AlertKind, NewAlert},
        with_timeout, AlertStore, StoreError,
    },
};

/// Persists one alert per approved throttle decision. Does no throttling.
#[derive(Clone)]
pub struct AlertRecorder {
    store: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl AlertRecorder {
    pub fn new(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { store, clock, timeout }
    }

    /// Build an unacknowledged alert stamped with the current time and write
    /// it to the store. Exactly one write per call.
    pub async fn record(
        &self,
        device_id: &str,
        gas_value: f64,
        kind: AlertKind,
    ) -> Result<Alert, StoreError> {
        let alert = NewAlert {
            device_id: device_id.to_owned(),
            kind,
            gas_value,
            message: alert_message(kind, gas_value),
            created_at: self.clock.now(),
        };

        let alert = with_timeout(self.timeout, self.store.save_alert(alert)).await?;
        info!(alert_id = %alert.id, device_id = %alert.device_id, kind = %alert.kind, "Alert recorded");
        Ok(alert)
    }
}

fn alert_message(kind: AlertKind, gas_value: f64) -> String {
    match kind {
        AlertKind::GasLeak => format!("High LPG level detected: {gas_value}"),
    }
}
