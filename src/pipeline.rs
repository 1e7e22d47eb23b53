//! Pipeline orchestration for one client analysis run.
//!
//! ## Responsibility
//! Sequence the analysis stages for one client+domain+metrics submission:
//! gap analysis → proposal generation → (test → record) for the first K
//! proposals → recommendation synthesis, and assemble the final report.
//!
//! ## Guarantees
//! - Strictly sequential; no parallelism inside a run.
//! - Backend failures in stages degrade to fallbacks and never abort the
//!   run; only a storage failure is fatal.
//! - Exactly one experiment row is written per tested proposal, each in
//!   its own transaction scope.
//! - No shared mutable state: a pipeline value is cheap to clone and safe
//!   to use from concurrent requests.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

use crate::backend::GenerationBackend;
use crate::stages;
use crate::store::Store;
use crate::{metrics, AnalysisReport, MetricsSnapshot, PipelineError, TestedProposal};

/// How the intervention tester obtains its results.
///
/// The generative mode asks the backend to simulate trial outcomes; the
/// fixed mode returns a canned placeholder without a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TesterMode {
    /// Simulate trials through the generation backend.
    Generative,
    /// Return [`stages::fixed_test_result`] without calling the backend.
    Fixed,
}

/// Orchestrator for client performance-analysis runs.
///
/// Collaborators are injected at construction; the orchestrator itself is
/// stateless between runs.
#[derive(Clone)]
pub struct AnalysisPipeline {
    backend: Arc<dyn GenerationBackend>,
    store: Store,
    proposals_to_test: usize,
    tester_mode: TesterMode,
}

impl AnalysisPipeline {
    /// Assemble a pipeline from its collaborators.
    ///
    /// `proposals_to_test` is K: how many proposals (taken from the front
    /// of the generated list) are tested and recorded per run.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: Store,
        proposals_to_test: usize,
        tester_mode: TesterMode,
    ) -> Self {
        Self {
            backend,
            store,
            proposals_to_test,
            tester_mode,
        }
    }

    /// Run one full analysis for a client.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if recording an experiment fails;
    /// every other stage failure degrades to its documented fallback and
    /// the run still succeeds.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn analyze(
        &self,
        client_id: i64,
        domain: &str,
        metrics_snapshot: &MetricsSnapshot,
    ) -> Result<AnalysisReport, PipelineError> {
        let run_start = Instant::now();

        // Stage 1: gap analysis. Never fails; worst case is the fallback gap.
        let start = Instant::now();
        let gaps = stages::analyze_gaps(self.backend.as_ref(), metrics_snapshot, domain)
            .instrument(info_span!("pipeline.gaps", client_id, stage = "gaps"))
            .await;
        metrics::inc_request("gaps");
        metrics::record_stage_latency("gaps", start.elapsed());
        info!(
            target: "clientpulse::pipeline",
            client_id,
            gap_count = gaps.len(),
            "gap analysis complete"
        );

        // Stage 2: proposal generation. Zero proposals is a valid outcome.
        let start = Instant::now();
        let proposals = stages::generate_proposals(self.backend.as_ref(), &gaps, domain)
            .instrument(info_span!("pipeline.proposals", client_id, stage = "proposals"))
            .await;
        metrics::inc_request("proposals");
        metrics::record_stage_latency("proposals", start.elapsed());
        info!(
            target: "clientpulse::pipeline",
            client_id,
            proposal_count = proposals.len(),
            "proposal generation complete"
        );

        // Stage 3: test and record the first K proposals. Each proposal is
        // tested and its experiment committed independently; only the
        // recorder's storage failure aborts the run.
        let samples = stages::sample_conversations(domain);
        let mut tested = Vec::new();
        for proposal in proposals.into_iter().take(self.proposals_to_test) {
            let start = Instant::now();
            let test_result = match self.tester_mode {
                TesterMode::Generative => {
                    stages::test_intervention(self.backend.as_ref(), &proposal.hypothesis, samples)
                        .instrument(info_span!("pipeline.test", client_id, stage = "test"))
                        .await
                }
                TesterMode::Fixed => stages::fixed_test_result(),
            };
            metrics::inc_request("test");
            metrics::record_stage_latency("test", start.elapsed());

            let results_json = serde_json::to_string(&test_result)
                .map_err(|e| PipelineError::Other(format!("result serialization failed: {e}")))?;
            let experiment_id = self.store.insert_experiment(
                client_id,
                &proposal.hypothesis,
                proposal.intervention.as_str(),
                "completed",
                &results_json,
            )?;
            metrics::inc_experiment();
            info!(
                target: "clientpulse::pipeline",
                client_id,
                experiment_id,
                success_rate = test_result.success_rate,
                "experiment recorded"
            );

            tested.push(TestedProposal {
                hypothesis: proposal.hypothesis,
                intervention: proposal.intervention,
                test_result,
            });
        }

        // Stage 4: pure synthesis over the accumulated tested list.
        let recommendations = stages::synthesize_recommendations(&tested);

        info!(
            target: "clientpulse::pipeline",
            client_id,
            domain,
            tested = tested.len(),
            duration_ms = run_start.elapsed().as_millis() as u64,
            "analysis run complete"
        );

        Ok(AnalysisReport {
            client_id,
            domain: domain.to_string(),
            performance_gaps: gaps,
            tested_proposals: tested,
            recommendations,
        })
    }
}
