// Prometheus metrics for the LambdaLite API

use lambdalite_common::types::InvocationResult;
use lambdalite_engine::pool::PoolStats;
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref INVOCATIONS: CounterVec = CounterVec::new(
        Opts::new("lambdalite_invocations_total", "Total function invocations"),
        &["language", "runtime", "status"]
    )
    .expect("metric can be created");

    pub static ref RESPONSE_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "lambdalite_response_time_seconds",
            "Invocation response time in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["language", "runtime", "cold_start"]
    )
    .expect("metric can be created");

    pub static ref REJECTED: CounterVec = CounterVec::new(
        Opts::new("lambdalite_invocations_rejected_total", "Invocations rejected before execution"),
        &["reason"]
    )
    .expect("metric can be created");

    pub static ref POOL_IDLE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("lambdalite_pool_idle", "Idle warm environments per key"),
        &["language", "runtime"]
    )
    .expect("metric can be created");

    pub static ref POOL_HITS: IntGauge = IntGauge::new(
        "lambdalite_pool_hits",
        "Invocations served by a warm environment"
    )
    .expect("metric can be created");

    pub static ref POOL_MISSES: IntGauge = IntGauge::new(
        "lambdalite_pool_misses",
        "Invocations that needed a cold start"
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(INVOCATIONS.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(RESPONSE_TIME.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(REJECTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(POOL_IDLE.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(POOL_HITS.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(POOL_MISSES.clone()))
        .expect("collector can be registered");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}\n", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_invocation(result: &InvocationResult) {
    let language = result.language.to_string();
    let runtime = result.runtime.to_string();
    let status = serde_json::to_value(result.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    let cold_start = if result.cold_start { "true" } else { "false" };

    INVOCATIONS
        .with_label_values(&[&language, &runtime, &status])
        .inc();
    RESPONSE_TIME
        .with_label_values(&[&language, &runtime, cold_start])
        .observe(result.response_time_seconds);
}

pub fn record_rejected(reason: &str) {
    REJECTED.with_label_values(&[reason]).inc();
}

/// Copy a pool snapshot into the gauges; called right before rendering
pub fn observe_pool(stats: &PoolStats) {
    for slot in &stats.slots {
        POOL_IDLE
            .with_label_values(&[&slot.language.to_string(), &slot.runtime.to_string()])
            .set(slot.idle as i64);
    }
    POOL_HITS.set(stats.hits as i64);
    POOL_MISSES.set(stats.misses as i64);
}
