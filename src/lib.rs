//! # clientpulse
//!
//! A small SaaS backend for AI-driven client performance analysis.
//!
//! ## Architecture
//!
//! One sequential analysis pipeline per inbound request:
//! ```text
//! metrics → gap analysis → proposals → (test → record) ×K → recommendations
//! ```
//!
//! The generative-text backend, the SQLite store, and outbound webhook
//! delivery are external collaborators with narrow contracts. Pipeline
//! stages recover locally from backend failures with documented fallback
//! values; only a storage failure aborts a run.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod backend;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod web_api;
pub mod webhook;

// Re-exports for convenience
pub use backend::{CannedBackend, GenerationBackend, OpenAiBackend};
pub use pipeline::{AnalysisPipeline, TesterMode};
pub use store::Store;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`PipelineError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), PipelineError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| PipelineError::Other(format!("tracing init failed: {e}")))
}

/// Top-level pipeline errors.
///
/// Every error surface in the analysis pipeline maps to a variant here.
/// All variants implement `std::error::Error` via [`thiserror`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A generation-backend call failed (network, API, or decode error).
    ///
    /// Pipeline stages recover from this locally with their documented
    /// fallback values; it never crosses the orchestrator boundary.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The persistence layer failed. Fatal for the pipeline run.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A configuration value is missing or invalid (e.g., missing env var).
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first analysis call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Named numeric metrics submitted with one analysis request.
///
/// Ordered so that prompt construction is deterministic for a given
/// snapshot. Ephemeral — never persisted as a standalone entity.
pub type MetricsSnapshot = BTreeMap<String, f64>;

/// The kind of intervention an improvement proposal suggests.
///
/// The two named kinds are what the generation backend is prompted to
/// choose between; anything else it invents round-trips through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    /// Adjust the prompt or response templates used by the client.
    PromptChange,
    /// Train a lightweight adapter on domain data.
    AdapterTraining,
    /// A caller- or backend-defined kind outside the named set.
    #[serde(untagged)]
    Other(String),
}

impl InterventionKind {
    /// Canonical string form, as stored in the experiments table.
    pub fn as_str(&self) -> &str {
        match self {
            Self::PromptChange => "prompt_change",
            Self::AdapterTraining => "adapter_training",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for InterventionKind {
    fn from(kind: &str) -> Self {
        match kind {
            "prompt_change" => Self::PromptChange,
            "adapter_training" => Self::AdapterTraining,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One improvement proposal produced by the proposal generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Natural-language hypothesis describing the improvement.
    pub hypothesis: String,
    /// The intervention kind the proposal suggests.
    pub intervention: InterventionKind,
    /// Backend-estimated impact, as a fraction (e.g. 0.15).
    #[serde(default)]
    pub expected_impact: f64,
}

/// Simulated evaluation of one intervention hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Simulated trial success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Estimated improvement delta over the baseline.
    pub improvement: f64,
    /// Risks surfaced during the simulated trial, ordered by severity.
    #[serde(default)]
    pub risks: Vec<String>,
}

/// A proposal together with its simulated evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestedProposal {
    /// Hypothesis under test.
    pub hypothesis: String,
    /// Intervention kind of the originating proposal.
    pub intervention: InterventionKind,
    /// Outcome of the simulated trial.
    pub test_result: TestResult,
}

/// Final response payload for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// The client this analysis was run for.
    pub client_id: i64,
    /// Business domain tag the metrics were analyzed under.
    pub domain: String,
    /// Identified performance gaps, at most 3, ordered by severity.
    pub performance_gaps: Vec<String>,
    /// Proposals that were tested and recorded, in test order.
    pub tested_proposals: Vec<TestedProposal>,
    /// One recommendation string per tested proposal, same order.
    pub recommendations: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_intervention_kind_round_trips_named_variants() {
        let json = serde_json::to_string(&InterventionKind::PromptChange).unwrap();
        assert_eq!(json, "\"prompt_change\"");
        let back: InterventionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InterventionKind::PromptChange);
    }

    #[test]
    fn test_intervention_kind_unknown_string_becomes_other() {
        let kind: InterventionKind = serde_json::from_str("\"workflow_automation\"").unwrap();
        assert_eq!(kind, InterventionKind::Other("workflow_automation".to_string()));
        assert_eq!(kind.as_str(), "workflow_automation");
    }

    #[test]
    fn test_intervention_kind_from_str_matches_as_str() {
        for raw in ["prompt_change", "adapter_training", "something_else"] {
            assert_eq!(InterventionKind::from(raw).as_str(), raw);
        }
    }

    #[test]
    fn test_proposal_decodes_without_expected_impact() {
        let proposal: Proposal = serde_json::from_str(
            r#"{"hypothesis": "Add canned replies", "intervention": "prompt_change"}"#,
        )
        .unwrap();
        assert_eq!(proposal.expected_impact, 0.0);
        assert_eq!(proposal.intervention, InterventionKind::PromptChange);
    }

    #[test]
    fn test_test_result_decodes_without_risks() {
        let result: TestResult =
            serde_json::from_str(r#"{"success_rate": 0.8, "improvement": 0.1}"#).unwrap();
        assert!(result.risks.is_empty());
    }

    #[test]
    fn test_config_error_display_includes_message() {
        let err = PipelineError::Config("OPENAI_API_KEY not set".to_string());
        assert!(err.to_string().contains("OPENAI_API_KEY not set"));
    }

    #[test]
    fn test_analysis_report_serializes_expected_field_names() {
        let report = AnalysisReport {
            client_id: 7,
            domain: "customer_support".to_string(),
            performance_gaps: vec!["slow replies".to_string()],
            tested_proposals: vec![],
            recommendations: vec![],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["client_id"], 7);
        assert!(value.get("performance_gaps").is_some());
        assert!(value.get("tested_proposals").is_some());
        assert!(value.get("recommendations").is_some());
    }
}
