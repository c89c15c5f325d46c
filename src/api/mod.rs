pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    alerts::{AlertRecorder, AlertThrottle},
    clock::Clock,
    db::{AlertStore, ReadingStore, TargetRegistry},
    notify::{NotificationDispatcher, NotificationFanout},
    pipeline::{PipelineSettings, ReadingPipeline},
};
use handlers::ApiDoc;

/// Shared handler state. Every store handle usually points at the same
/// backing store.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReadingPipeline>,
    pub readings: Arc<dyn ReadingStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub targets: Arc<dyn TargetRegistry>,
}

impl AppState {
    /// Wire the pipeline and the query handles around one store.
    pub fn new<S>(
        store: Arc<S>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
        fanout_concurrency: usize,
    ) -> Self
    where
        S: ReadingStore + AlertStore + TargetRegistry + 'static,
    {
        let readings: Arc<dyn ReadingStore> = store.clone();
        let alerts: Arc<dyn AlertStore> = store.clone();
        let targets: Arc<dyn TargetRegistry> = store;

        let recorder = AlertRecorder::new(alerts.clone(), clock.clone(), settings.io_timeout);
        let fanout = NotificationFanout::new(
            targets.clone(),
            dispatcher,
            fanout_concurrency,
            settings.io_timeout,
        );
        let pipeline = ReadingPipeline::new(
            readings.clone(),
            AlertThrottle::new(),
            recorder,
            fanout,
            clock,
            settings,
        );

        Self {
            pipeline: Arc::new(pipeline),
            readings,
            alerts,
            targets,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/api/gas",
            get(handlers::list_readings).post(handlers::submit_reading),
        )
        .route("/api/gas/{device_id}", get(handlers::device_readings))
        .route(
            "/api/gas/{device_id}/statistics",
            get(handlers::device_statistics),
        )
        .route("/api/alerts", get(handlers::list_alerts))
        .route("/api/alerts/unread-count", get(handlers::unread_count))
        .route(
            "/api/alerts/{id}/acknowledge",
            patch(handlers::acknowledge_alert),
        )
        .route("/api/alerts/{id}", delete(handlers::delete_alert))
        .route(
            "/api/tokens",
            get(handlers::list_tokens).post(handlers::register_token),
        )
        .route("/api/tokens/{user_id}", delete(handlers::remove_token))
        .route("/api/notifications/test", post(handlers::test_notification))
        .with_state(state)
        .split_for_parts();

    router.route("/health", get(handlers::health)).route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
