use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all analyzer job metrics
const PREFIX: &str = "analyzer_jobs";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Chain submission and execution
    pub static ref CHAIN_SUBMISSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_chain_submissions_total"), "Chain submissions by outcome"),
        &["chain", "outcome"]
    ).expect("Failed to create chain_submissions_total metric");

    pub static ref STAGE_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_stage_executions_total"), "Chain stage executions"),
        &["stage", "status"]
    ).expect("Failed to create stage_executions_total metric");

    pub static ref STAGE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_stage_duration_seconds"),
            "Chain stage duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        &["stage"]
    ).expect("Failed to create stage_duration_seconds metric");

    // Registry drift
    pub static ref REGISTRY_MISSING_TASKS: Gauge = Gauge::new(
        format!("{PREFIX}_registry_missing_tasks"),
        "Analyzer tasks found by the last check with no registry entry"
    ).expect("Failed to create registry_missing_tasks metric");

    pub static ref RECONCILER_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_reconciler_errors_total"),
        "Reconciliation checks that failed internally"
    ).expect("Failed to create reconciler_errors_total metric");

    // Analyses
    pub static ref ANALYSES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_analyses_total"), "Analysis creation attempts"),
        &["outcome"]
    ).expect("Failed to create analyses_total metric");
}

/// Register all metrics. Safe to call more than once.
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(CHAIN_SUBMISSIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STAGE_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STAGE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REGISTRY_MISSING_TASKS.clone()));
    let _ = REGISTRY.register(Box::new(RECONCILER_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ANALYSES_TOTAL.clone()));

    tracing::debug!("Metrics system initialized");
}

pub fn record_chain_submission(chain: &str, outcome: &str) {
    CHAIN_SUBMISSIONS_TOTAL
        .with_label_values(&[chain, outcome])
        .inc();
}

pub fn record_stage_execution(stage: &str, status: &str, duration: Duration) {
    STAGE_EXECUTIONS_TOTAL
        .with_label_values(&[stage, status])
        .inc();

    STAGE_DURATION_SECONDS
        .with_label_values(&[stage])
        .observe(duration.as_secs_f64());
}

pub fn set_registry_missing_tasks(count: usize) {
    REGISTRY_MISSING_TASKS.set(count as f64);
}

pub fn record_reconciler_error() {
    RECONCILER_ERRORS_TOTAL.inc();
}

pub fn record_analysis(outcome: &str) {
    ANALYSES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Render every registered metric in the Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}
