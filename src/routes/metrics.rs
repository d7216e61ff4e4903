use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the server, worker and reaper emit.
pub fn describe_metrics() {
    metrics::describe_counter!("image_jobs_submitted_total", "Image jobs accepted, by tier");
    metrics::describe_counter!("image_jobs_completed_total", "Image jobs completed");
    metrics::describe_counter!("image_jobs_failed_total", "Image jobs that failed or timed out");
    metrics::describe_histogram!(
        "image_processing_seconds",
        "Time to render one image job"
    );
    metrics::describe_counter!("image_jobs_reaped_total", "Expired image jobs deleted");
    metrics::describe_gauge!("image_queue_depth", "Jobs waiting in the queue");
    metrics::describe_counter!("image_downloads_total", "Processed images served");
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
