//! Prometheus metrics for the analysis service.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. Every helper below is a
//! no-op until then, so the pipeline is always safe to run — observability
//! simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `clientpulse_requests_total` | Counter | `stage` |
//! | `clientpulse_backend_failures_total` | Counter | `stage` |
//! | `clientpulse_stage_duration_seconds` | Histogram | `stage` |
//! | `clientpulse_experiments_recorded_total` | Counter | |
//! | `clientpulse_webhook_deliveries_total` | Counter | `outcome` |

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

use crate::PipelineError;

/// All Prometheus metrics for the service, bundled so they can live in a
/// single [`OnceLock`] and initialise atomically.
struct Metrics {
    registry: Registry,
    requests_total: CounterVec,
    backend_failures: CounterVec,
    stage_duration: HistogramVec,
    experiments_recorded: IntCounter,
    webhook_deliveries: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`PipelineError::Other`] if metric construction or registration
/// fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), PipelineError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("clientpulse_requests_total", "Stage executions"),
        &["stage"],
    )
    .map_err(|e| PipelineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(requests_total.clone()))
        .map_err(|e| PipelineError::Other(format!("metrics registration failed: {e}")))?;

    let backend_failures = CounterVec::new(
        Opts::new(
            "clientpulse_backend_failures_total",
            "Generation-backend failures recovered by stage fallbacks",
        ),
        &["stage"],
    )
    .map_err(|e| PipelineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(backend_failures.clone()))
        .map_err(|e| PipelineError::Other(format!("metrics registration failed: {e}")))?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "clientpulse_stage_duration_seconds",
            "Processing duration per stage",
        ),
        &["stage"],
    )
    .map_err(|e| PipelineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(stage_duration.clone()))
        .map_err(|e| PipelineError::Other(format!("metrics registration failed: {e}")))?;

    let experiments_recorded = IntCounter::new(
        "clientpulse_experiments_recorded_total",
        "Experiment rows appended",
    )
    .map_err(|e| PipelineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(experiments_recorded.clone()))
        .map_err(|e| PipelineError::Other(format!("metrics registration failed: {e}")))?;

    let webhook_deliveries = CounterVec::new(
        Opts::new(
            "clientpulse_webhook_deliveries_total",
            "Webhook delivery attempts by outcome",
        ),
        &["outcome"],
    )
    .map_err(|e| PipelineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(webhook_deliveries.clone()))
        .map_err(|e| PipelineError::Other(format!("metrics registration failed: {e}")))?;

    // If another thread raced us, the first one wins — both initializations
    // produce identical metric descriptors, so neither outcome is incorrect.
    let _ = METRICS.set(Metrics {
        registry,
        requests_total,
        backend_failures,
        stage_duration,
        experiments_recorded,
        webhook_deliveries,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Increment the execution counter for a pipeline stage.
///
/// No-op if metrics have not been initialised.
pub fn inc_request(stage: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[stage]) {
            c.inc();
        }
    }
}

/// Increment the recovered-backend-failure counter for a stage.
///
/// No-op if metrics have not been initialised.
pub fn inc_backend_failure(stage: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.backend_failures.get_metric_with_label_values(&[stage]) {
            c.inc();
        }
    }
}

/// Record the processing latency for a pipeline stage.
///
/// No-op if metrics have not been initialised.
pub fn record_stage_latency(stage: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.stage_duration.get_metric_with_label_values(&[stage]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one appended experiment row.
///
/// No-op if metrics have not been initialised.
pub fn inc_experiment() {
    if let Some(m) = metrics() {
        m.experiments_recorded.inc();
    }
}

/// Count one webhook delivery attempt by outcome
/// (`delivered` / `rejected` / `failed`).
///
/// No-op if metrics have not been initialised.
pub fn inc_webhook(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.webhook_deliveries.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails; observability degrades rather than failing the request.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
