//! Controller metrics

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Service reconciliation duration
    static ref SERVICE_RECONCILIATION_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "service_reconciliation_duration_seconds",
            "Service reconciliation duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["service", "namespace"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Service reconciliations total
    static ref SERVICE_RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "service_reconciliations_total",
            "Total number of service reconciliations",
        );
        let counter = IntCounterVec::new(opts, &["service", "namespace", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Watch notifications by kind
    static ref WATCH_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "service_watch_events_total",
            "Total number of service watch notifications",
        );
        let counter = IntCounterVec::new(opts, &["kind"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record Service reconciliation
pub fn record_service_reconciliation(
    service: &str,
    namespace: &str,
    duration_secs: f64,
    result: &str,
) {
    SERVICE_RECONCILIATION_DURATION
        .with_label_values(&[service, namespace])
        .observe(duration_secs);

    SERVICE_RECONCILIATIONS_TOTAL
        .with_label_values(&[service, namespace, result])
        .inc();
}

/// Record a watch notification (added, modified, deleted, other, error)
pub fn record_watch_event(kind: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}
