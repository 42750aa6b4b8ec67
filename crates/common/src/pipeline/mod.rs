//! Session lifecycle around one resolution run
//!
//! ```text
//! Disconnected -> Connected -> ContextReady -> DataReady -> Exported -> Closed
//! ```
//!
//! Any stage may fail. Once a session exists it is closed on every path,
//! and the close happens before the outcome is handed back.

use crate::engine::{CandidateKind, ConnectionCandidate, EngineConnector, Session};
use crate::errors::Result;
use crate::export::{ExportFormat, Exporter};
use crate::metrics::record_execution;
use crate::resolve::{ContextResolver, ObservableResolver, SemanticQuery};
use crate::spatial::SpatialTemporalExtent;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Disconnected,
    Connected,
    ContextReady,
    DataReady,
    Exported,
    Closed,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Disconnected => "disconnected",
            PipelineStage::Connected => "connected",
            PipelineStage::ContextReady => "context_ready",
            PipelineStage::DataReady => "data_ready",
            PipelineStage::Exported => "exported",
            PipelineStage::Closed => "closed",
            PipelineStage::Failed => "failed",
        }
    }

    /// Name of the step that runs from this stage, for failure reporting
    fn next_step(&self) -> &'static str {
        match self {
            PipelineStage::Disconnected => "connect",
            PipelineStage::Connected => "context",
            PipelineStage::ContextReady => "observable",
            PipelineStage::DataReady => "export",
            PipelineStage::Exported | PipelineStage::Closed | PipelineStage::Failed => "close",
        }
    }
}

/// Everything one run needs, built and validated before connecting
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub base_observable: SemanticQuery,
    pub query: SemanticQuery,
    pub extent: SpatialTemporalExtent,
    pub format: ExportFormat,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub session_endpoint: String,
    pub candidate: CandidateKind,
}

/// connect, resolve context, resolve observable, export, close
#[derive(Clone)]
pub struct Pipeline {
    connector: EngineConnector,
    contexts: ContextResolver,
    observables: ObservableResolver,
    exporter: Exporter,
}

impl Pipeline {
    pub fn new(connector: EngineConnector, ticket_timeout: Option<Duration>) -> Self {
        Self {
            connector,
            contexts: ContextResolver::new(ticket_timeout),
            observables: ObservableResolver::new(ticket_timeout),
            exporter: Exporter,
        }
    }

    pub async fn run(
        &self,
        candidates: &[ConnectionCandidate],
        request: &PipelineRequest,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();

        let session = match self.connector.connect(candidates).await {
            Ok(session) => session,
            Err(e) => {
                // Nothing acquired, nothing to release
                record_execution(started.elapsed().as_secs_f64(), Some("connect"));
                return Err(e);
            }
        };

        let mut stage = PipelineStage::Connected;
        let outcome = self.resolve_and_export(&session, request, &mut stage).await;
        let failed_step = outcome.as_ref().err().map(|_| stage.next_step());
        if failed_step.is_some() {
            transition(&mut stage, PipelineStage::Failed);
        }

        let endpoint = session.endpoint().to_string();
        let session_id = session.id().clone();
        match session.close().await {
            Ok(()) => debug!(session = %session_id, "Session closed"),
            Err(e) => warn!(session = %session_id, error = %e, "Failed to close engine session"),
        }
        transition(&mut stage, PipelineStage::Closed);

        record_execution(started.elapsed().as_secs_f64(), failed_step);
        match &outcome {
            Ok(result) => info!(
                output = %result.output_path.display(),
                bytes = result.bytes_written,
                endpoint = %endpoint,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline completed"
            ),
            Err(e) => error!(
                step = failed_step.unwrap_or("unknown"),
                error = %e,
                "Pipeline failed"
            ),
        }
        outcome
    }

    /// Advances `stage` as each step succeeds; on failure it is left at the
    /// last stage reached.
    async fn resolve_and_export(
        &self,
        session: &Session,
        request: &PipelineRequest,
        stage: &mut PipelineStage,
    ) -> Result<PipelineOutcome> {
        let context = self
            .contexts
            .resolve_context(session, &request.base_observable, &request.extent)
            .await?;
        transition(stage, PipelineStage::ContextReady);

        let dataset = self
            .observables
            .resolve_observable(&context, &request.query)
            .await?;
        transition(stage, PipelineStage::DataReady);

        let bytes_written = self
            .exporter
            .export(&dataset, request.format, &request.output_path)
            .await?;
        transition(stage, PipelineStage::Exported);

        Ok(PipelineOutcome {
            output_path: request.output_path.clone(),
            bytes_written,
            session_endpoint: session.endpoint().to_string(),
            candidate: session.kind(),
        })
    }
}

fn transition(stage: &mut PipelineStage, next: PipelineStage) {
    debug!(from = stage.as_str(), to = next.as_str(), "Pipeline stage");
    *stage = next;
}
