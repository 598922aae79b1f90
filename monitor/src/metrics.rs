use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref FRAMES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_frames_total",
        "Total text frames received from the device"
    ))
    .unwrap();
    pub static ref DISPATCHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_dispatched_total",
        "Total frames dispatched to the chart or page"
    ))
    .unwrap();
    pub static ref MALFORMED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_malformed_total",
        "Total frames dropped because they could not be parsed or classified"
    ))
    .unwrap();
    pub static ref UNKNOWN_KIND_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_unknown_kind_total",
        "Total tagged messages ignored for an unknown type"
    ))
    .unwrap();
    pub static ref MISSING_ELEMENT_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_missing_element_total",
        "Total element writes skipped because the page has no such element"
    ))
    .unwrap();
    pub static ref CONNECTION_ATTEMPTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_connection_attempts_total",
        "Total WebSocket connection attempts"
    ))
    .unwrap();
    pub static ref RECONNECTS_SCHEDULED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_reconnects_scheduled_total",
        "Total reconnect timers scheduled after a close"
    ))
    .unwrap();
    pub static ref SEND_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_send_failures_total",
        "Total commands rejected or dropped before reaching the device"
    ))
    .unwrap();
    pub static ref CONNECTION_OPEN: Gauge = Gauge::with_opts(Opts::new(
        "monitor_connection_open",
        "1 while the WebSocket connection is open"
    ))
    .unwrap();
    pub static ref DISPATCH_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_dispatch_latency_seconds",
            "Time taken to parse and apply one frame"
        )
        .buckets(vec![
            0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(FRAMES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(DISPATCHED_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(MALFORMED_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(UNKNOWN_KIND_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MISSING_ELEMENT_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CONNECTION_ATTEMPTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RECONNECTS_SCHEDULED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SEND_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(CONNECTION_OPEN.clone())).unwrap();
    REGISTRY
        .register(Box::new(DISPATCH_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
