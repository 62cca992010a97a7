use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use scriptflow_queue::QueueStats;
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rate_limit_rejections_total", "Requests rejected by the rate limiter"),
        &["category"],
    )
    .expect("valid rate_limit_rejections_total definition");

    pub static ref JOBS_BY_STATUS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("jobs_by_status", "Jobs currently held by the queue, by status"),
        &["status"],
    )
    .expect("valid jobs_by_status definition");

    pub static ref HTTP_AUTH_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "http_auth_failures_total",
        "Requests rejected for missing or invalid credentials",
    ))
    .expect("valid http_auth_failures_total definition");
}

/// Register the API collectors. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(RATE_LIMIT_REJECTIONS_TOTAL.clone()),
        Box::new(JOBS_BY_STATUS.clone()),
        Box::new(HTTP_AUTH_FAILURES_TOTAL.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => warn!("Failed to register metric: {}", e),
        }
    }

    #[cfg(target_os = "linux")]
    {
        let process = prometheus::process_collector::ProcessCollector::for_self();
        match REGISTRY.register(Box::new(process)) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => warn!("Failed to register process collector: {}", e),
        }
    }
}

pub fn record_queue_stats(stats: &QueueStats) {
    JOBS_BY_STATUS
        .with_label_values(&["QUEUED"])
        .set(stats.queued as i64);
    JOBS_BY_STATUS
        .with_label_values(&["PROCESSING"])
        .set(stats.processing as i64);
    JOBS_BY_STATUS
        .with_label_values(&["COMPLETED"])
        .set(stats.completed as i64);
    JOBS_BY_STATUS
        .with_label_values(&["FAILED"])
        .set(stats.failed as i64);
}

/// Prometheus text exposition of everything in [`REGISTRY`].
pub fn render() -> Result<String, String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}
