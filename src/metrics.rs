use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time series registration so descriptions show up on /metrics.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("camwatch_frames_total", "Frames read from sources.");
        describe_counter!(
            "camwatch_frame_errors_total",
            "Frames skipped because inference failed."
        );
        describe_counter!(
            "camwatch_detections_total",
            "Frames where the target class was present."
        );
        describe_counter!(
            "camwatch_events_recorded_total",
            "Detection events inserted into the store."
        );
        describe_counter!(
            "camwatch_events_pruned_total",
            "Superseded events deleted from their minute bucket."
        );
        describe_counter!(
            "camwatch_store_errors_total",
            "Detections dropped because a store call failed."
        );
        describe_counter!(
            "camwatch_source_reconnects_total",
            "Open failures and stream losses that led to a backoff."
        );
        describe_counter!(
            "camwatch_display_dropped_total",
            "Annotated frames dropped by the display queue."
        );
        describe_histogram!("camwatch_dedup_ms", "Dedup protocol duration in milliseconds.");
        describe_gauge!(
            "camwatch_worker_streaming",
            "1 while the source worker is streaming, 0 otherwise."
        );
    });
}
