//! Prometheus metrics surface (spec §4.13). Gated behind the
//! `metrics-surface` feature; with the feature off every function here is a
//! no-op so call sites elsewhere never need their own `#[cfg]`.

#[cfg(feature = "metrics-surface")]
mod enabled {
    use std::sync::OnceLock;
    use std::time::Duration;

    use metrics::{counter, gauge, histogram};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

    static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

    fn handle() -> &'static PrometheusHandle {
        PROM_HANDLE.get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install global metrics recorder")
        })
    }

    pub fn install() {
        let _ = handle();
    }

    pub fn render() -> String {
        handle().render()
    }

    pub fn record_sync_duration(kind: &str, duration: Duration) {
        histogram!("sync_duration_seconds", "kind" => kind.to_string()).record(duration.as_secs_f64());
    }

    pub fn record_sync_items(kind: &str, count: i64) {
        counter!("sync_items_total", "kind" => kind.to_string()).increment(count.max(0) as u64);
    }

    pub fn record_watch_reconnect(kind: &str) {
        counter!("watch_reconnects_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_watch_event(kind: &str, phase: &str) {
        counter!("watch_events_total", "kind" => kind.to_string(), "phase" => phase.to_string())
            .increment(1);
    }

    pub fn record_bulk_write_retry(kind: &str) {
        counter!("store_bulk_write_retries_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn set_sync_progress_ratio(ratio: f64) {
        gauge!("sync_progress_ratio").set(ratio);
    }
}

#[cfg(not(feature = "metrics-surface"))]
mod disabled {
    use std::time::Duration;

    pub fn install() {}
    pub fn render() -> String {
        String::new()
    }
    pub fn record_sync_duration(_kind: &str, _duration: Duration) {}
    pub fn record_sync_items(_kind: &str, _count: i64) {}
    pub fn record_watch_reconnect(_kind: &str) {}
    pub fn record_watch_event(_kind: &str, _phase: &str) {}
    pub fn record_bulk_write_retry(_kind: &str) {}
    pub fn set_sync_progress_ratio(_ratio: f64) {}
}

#[cfg(feature = "metrics-surface")]
pub use enabled::*;

#[cfg(not(feature = "metrics-surface"))]
pub use disabled::*;
