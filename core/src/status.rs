use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::progress::{OverallStatus, SyncProgress};
use crate::registry::Registry;

/// Triggers an out-of-band full sync: `None` means every registered kind,
/// `Some(plural)` means just that one (spec §6 `POST /sync/trigger`).
pub type TriggerSyncFn = Arc<dyn Fn(Option<String>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct StatusState {
    pub progress: Arc<SyncProgress>,
    pub registry: Arc<Registry>,
    pub ready: Arc<AtomicBool>,
    pub trigger_sync: TriggerSyncFn,
}

/// `SyncProgress.status == completed` AND the `ready` flag is set (spec
/// §4.8 "Ready").
fn is_ready(state: &StatusState) -> bool {
    state.ready.load(Ordering::SeqCst) && state.progress.is_completed()
}

async fn health_live() -> &'static str {
    "ok"
}

async fn health_ready(State(state): State<StatusState>) -> impl IntoResponse {
    if is_ready(&state) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn sync_status(State(state): State<StatusState>) -> impl IntoResponse {
    let snap = state.progress.snapshot();
    let mut response = Json(&snap).into_response();
    let headers = response.headers_mut();

    if let Ok(v) = HeaderValue::from_str(snap.status.as_str()) {
        headers.insert("X-Sync-Status", v);
    }

    match snap.status {
        OverallStatus::Completed => {
            if let Some(end_time) = snap.end_time {
                if let Ok(v) = HeaderValue::from_str(&end_time.to_rfc3339()) {
                    headers.insert("X-Sync-End-Time", v);
                }
                let duration_ms = (end_time - snap.start_time).num_milliseconds().max(0);
                if let Ok(v) = HeaderValue::from_str(&duration_ms.to_string()) {
                    headers.insert("X-Sync-Duration", v);
                }
            }
        }
        OverallStatus::Failed => {
            if let Some(err) = &snap.error {
                if let Ok(v) = HeaderValue::from_str(err) {
                    headers.insert("X-Sync-Error", v);
                }
            }
        }
        OverallStatus::NotStarted | OverallStatus::InProgress => {
            if let Ok(v) = HeaderValue::from_str(snap.step.as_str()) {
                headers.insert("X-Sync-Step", v);
            }
            if let Ok(v) = HeaderValue::from_str(&format!("{}/{}", snap.synced_resources, snap.total_resources)) {
                headers.insert("X-Sync-Progress", v);
            }
            if let Some(current) = &snap.current_resource {
                if let Ok(v) = HeaderValue::from_str(current) {
                    headers.insert("X-Sync-Current-Resource", v);
                }
            }
        }
    }

    response
}

async fn trigger_all(State(state): State<StatusState>) -> impl IntoResponse {
    (state.trigger_sync)(None).await;
    StatusCode::ACCEPTED
}

async fn trigger_kind(State(state): State<StatusState>, Path(kind): Path<String>) -> impl IntoResponse {
    if state.registry.lookup_by_plural(&kind).is_none() {
        return StatusCode::NOT_FOUND;
    }
    (state.trigger_sync)(Some(kind)).await;
    StatusCode::ACCEPTED
}

async fn metrics_text() -> impl IntoResponse {
    crate::metrics::render()
}

pub fn router(state: StatusState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/sync/status", get(sync_status))
        .route("/sync/trigger", post(trigger_all))
        .route("/sync/trigger/{kind}", post(trigger_kind))
        .route("/metrics", get(metrics_text))
        .layer(cors)
        .with_state(state)
}

/// Runs the status/health/metrics HTTP surface until `cancel` fires (spec
/// §4.14). This is deliberately separate from the gateway's own listing
/// API — it only ever exposes sync machinery state.
pub async fn run_status_server(port: u16, state: StatusState, cancel: CancellationToken) -> std::io::Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flag_round_trips() {
        let ready = Arc::new(AtomicBool::new(false));
        assert!(!ready.load(Ordering::SeqCst));
        ready.store(true, Ordering::SeqCst);
        assert!(ready.load(Ordering::SeqCst));
    }

    #[test]
    fn not_ready_until_progress_completes_even_with_ready_flag_set() {
        let state = StatusState {
            progress: Arc::new(SyncProgress::new()),
            registry: Arc::new(Registry::build(Vec::new()).unwrap()),
            ready: Arc::new(AtomicBool::new(true)),
            trigger_sync: Arc::new(|_| Box::pin(async {})),
        };
        assert!(!is_ready(&state));
        state.progress.begin_sync(&[]);
        state.progress.mark_completed();
        assert!(is_ready(&state));
    }
}
