//! One reading, end to end: ingest, store, evaluate, throttle, record, notify.
//!
//! ```text
//!  submit ─► INGESTED ─► STORED ─► EVALUATED ─► THROTTLED ─► ALERTED ─► NOTIFIED
//!               │           │          │             │            │          │
//!               ▼           ▼          ▼             ▼            ▼          ▼
//!           REJECTED   STORE_FAILED  COMPLETE     COMPLETE   ALERT_FAILED  COMPLETE
//!                                   (normal)    (suppressed)
//! ```
//!
//! `REJECTED` and `STORE_FAILED` come back as [`PipelineError`]: nothing was
//! kept. Every other terminal is a [`PipelineOutcome`] carrying the stored
//! reading. No stage is retried here.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use crate::{
    alerts::{evaluate, Admission, AlertRecorder, AlertThrottle, Verdict},
    clock::Clock,
    db::{
        models::{Alert, AlertKind, Reading},
        with_timeout, ReadingStore, StoreError,
    },
    notify::{DispatchReport, NotificationFanout},
    readings::{validate, ReadingSubmission, ValidationError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Rejected,
    StoreFailed,
    Complete,
    AlertFailed,
}

/// The pipeline stopped before the reading was kept.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid reading: {0}")]
    Rejected(#[from] ValidationError),

    #[error("reading could not be stored: {0}")]
    StoreFailed(#[source] StoreError),
}

impl PipelineError {
    pub fn terminal_state(&self) -> TerminalState {
        match self {
            PipelineError::Rejected(_) => TerminalState::Rejected,
            PipelineError::StoreFailed(_) => TerminalState::StoreFailed,
        }
    }
}

/// Result of a reading that was stored. Fields after `reading` show how far
/// the alert stages got.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub state: TerminalState,
    pub reading: Reading,
    pub verdict: Verdict,
    /// `None` when the verdict was `Normal` and the throttle was not consulted.
    pub admission: Option<Admission>,
    pub alert: Option<Alert>,
    /// Why recording the alert failed, for `AlertFailed`.
    pub alert_error: Option<String>,
    pub dispatch: Option<DispatchReport>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub threshold: f64,
    pub throttle_window: Duration,
    pub io_timeout: Duration,
}

#[derive(Clone)]
pub struct ReadingPipeline {
    readings: Arc<dyn ReadingStore>,
    throttle: AlertThrottle,
    recorder: AlertRecorder,
    fanout: NotificationFanout,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl ReadingPipeline {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        throttle: AlertThrottle,
        recorder: AlertRecorder,
        fanout: NotificationFanout,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            readings,
            throttle,
            recorder,
            fanout,
            clock,
            settings,
        }
    }

    pub fn throttle(&self) -> &AlertThrottle {
        &self.throttle
    }

    pub fn fanout(&self) -> &NotificationFanout {
        &self.fanout
    }

    pub async fn submit(
        &self,
        submission: ReadingSubmission,
    ) -> Result<PipelineOutcome, PipelineError> {
        // INGESTED
        let new_reading = validate(submission, self.clock.now())?;

        // STORED
        let reading = with_timeout(
            self.settings.io_timeout,
            self.readings.save_reading(new_reading),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to store gas reading");
            PipelineError::StoreFailed(e)
        })?;
        info!(
            reading_id = %reading.id,
            device_id = %reading.device_id,
            gas_value = reading.gas_value,
            status = %reading.status,
            "Gas reading stored"
        );

        // EVALUATED
        let verdict = evaluate(reading.gas_value, self.settings.threshold);
        let mut outcome = PipelineOutcome {
            state: TerminalState::Complete,
            reading,
            verdict,
            admission: None,
            alert: None,
            alert_error: None,
            dispatch: None,
        };
        if verdict == Verdict::Normal {
            return Ok(outcome);
        }

        // THROTTLED
        let device_id = outcome.reading.device_id.clone();
        let approved_at = self.clock.now();
        let admission = self
            .throttle
            .admit(&device_id, approved_at, self.settings.throttle_window);
        outcome.admission = Some(admission);
        if admission == Admission::Suppressed {
            debug!(device_id = %device_id, "Alert suppressed by throttle");
            return Ok(outcome);
        }
        info!(
            device_id = %device_id,
            gas_value = outcome.reading.gas_value,
            threshold = self.settings.threshold,
            "High gas level; raising alert"
        );

        // ALERTED
        let alert = match self
            .recorder
            .record(&device_id, outcome.reading.gas_value, AlertKind::GasLeak)
            .await
        {
            Ok(alert) => alert,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to record alert");
                self.throttle.release(&device_id, approved_at);
                outcome.state = TerminalState::AlertFailed;
                outcome.alert_error = Some(e.to_string());
                return Ok(outcome);
            }
        };

        // NOTIFIED
        outcome.dispatch = Some(self.fanout.dispatch(&alert).await);
        outcome.alert = Some(alert);
        Ok(outcome)
    }
}
