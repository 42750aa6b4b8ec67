//! Two-phase resolution: a spatial/temporal context, then an observable
//! inside it. Each phase submits one ticket and waits for it; nothing is
//! retried here.

use crate::engine::{Context, Dataset, Session};
use crate::errors::{AppError, EngineError, Result};
use crate::metrics::StageTimer;
use crate::spatial::SpatialTemporalExtent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, instrument};

type EngineResult<T> = std::result::Result<T, EngineError>;

/// Opaque semantic identifier, e.g. `im:Nature` or `earth:Region`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemanticQuery(String);

impl SemanticQuery {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation(
                "semantic_query",
                "semantic query must not be empty",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SemanticQuery {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SemanticQuery> for String {
    fn from(query: SemanticQuery) -> Self {
        query.0
    }
}

impl fmt::Display for SemanticQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requests the spatial/temporal frame for an execution
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextResolver {
    ticket_timeout: Option<Duration>,
}

impl ContextResolver {
    /// `ticket_timeout` bounds the wait on the context ticket; `None` waits forever
    pub fn new(ticket_timeout: Option<Duration>) -> Self {
        Self { ticket_timeout }
    }

    /// Submit the extent under `base_kind` and wait for the context
    #[instrument(skip_all, fields(session = %session.id(), base = %base_kind, year = extent.year()))]
    pub async fn resolve_context<'s>(
        &self,
        session: &'s Session,
        base_kind: &SemanticQuery,
        extent: &SpatialTemporalExtent,
    ) -> Result<Context<'s>> {
        let timer = StageTimer::start("context");
        let outcome = self.submit_and_wait(session, base_kind, extent).await;
        timer.finish(outcome.is_ok());

        match outcome {
            Ok(context) => {
                info!(context = %context.handle().id, "Context resolved");
                Ok(context)
            }
            Err(e) => {
                error!(error = %e, "Context resolution failed");
                Err(AppError::ContextResolution(e))
            }
        }
    }

    async fn submit_and_wait<'s>(
        &self,
        session: &'s Session,
        base_kind: &SemanticQuery,
        extent: &SpatialTemporalExtent,
    ) -> EngineResult<Context<'s>> {
        let geometry = extent.geometry_descriptor();
        let ticket = session.submit_context(base_kind, &geometry).await?;
        let handle = ticket.await_with(self.ticket_timeout).await?;
        session.context(handle)
    }
}

/// Resolves a semantic query inside an already-resolved context
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservableResolver {
    ticket_timeout: Option<Duration>,
}

impl ObservableResolver {
    pub fn new(ticket_timeout: Option<Duration>) -> Self {
        Self { ticket_timeout }
    }

    #[instrument(skip_all, fields(context = %context.handle().id, query = %query))]
    pub async fn resolve_observable<'c>(
        &self,
        context: &'c Context<'_>,
        query: &SemanticQuery,
    ) -> Result<Dataset<'c>> {
        let timer = StageTimer::start("observable");
        let outcome = self.submit_and_wait(context, query).await;
        timer.finish(outcome.is_ok());

        match outcome {
            Ok(dataset) => {
                info!(dataset = %dataset.handle().id, shape = ?dataset.shape(), "Observable resolved");
                Ok(dataset)
            }
            Err(e) => {
                error!(error = %e, "Observable resolution failed");
                Err(AppError::ObservableResolution(e))
            }
        }
    }

    async fn submit_and_wait<'c>(
        &self,
        context: &'c Context<'_>,
        query: &SemanticQuery,
    ) -> EngineResult<Dataset<'c>> {
        let ticket = context.submit(query).await?;
        let info = ticket.await_with(self.ticket_timeout).await?;
        context.dataset(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MockEvent};
    use crate::engine::{ConnectionCandidate, EngineConnector};
    use crate::errors::ErrorCode;
    use crate::spatial::{RawWktBuilder, SpatialContextBuilder};
    use std::sync::Arc;

    fn extent() -> SpatialTemporalExtent {
        let area = RawWktBuilder::new("EPSG:4326 POLYGON((10 45, 11 45, 11 46, 10 46, 10 45))")
            .build_area()
            .unwrap();
        SpatialTemporalExtent::new(area, "1 km".parse().unwrap(), 2015).unwrap()
    }

    async fn session(engine: &MockEngine) -> Session {
        EngineConnector::new(Arc::new(engine.clone()), Duration::from_secs(5))
            .connect(&[ConnectionCandidate::local()])
            .await
            .unwrap()
    }

    #[test]
    fn test_semantic_query_must_not_be_empty() {
        assert!(SemanticQuery::new("   ").is_err());
        assert_eq!(SemanticQuery::new(" im:Nature ").unwrap().as_str(), "im:Nature");

        let parsed: std::result::Result<SemanticQuery, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_observable_submitted_after_context_resolves() {
        let engine = MockEngine::default();
        let session = session(&engine).await;
        let base = SemanticQuery::new("earth:Region").unwrap();
        let query = SemanticQuery::new("im:Nature").unwrap();

        {
            let context = ContextResolver::default()
                .resolve_context(&session, &base, &extent())
                .await
                .unwrap();
            let dataset = ObservableResolver::default()
                .resolve_observable(&context, &query)
                .await
                .unwrap();
            assert_eq!(dataset.handle().context, context.handle().id);
        }

        let resolved = engine.position(|e| *e == MockEvent::ContextResolved).unwrap();
        let submitted = engine
            .position(|e| matches!(e, MockEvent::ObservableSubmitted { .. }))
            .unwrap();
        assert!(resolved < submitted);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_context_geometry_is_sent() {
        let engine = MockEngine::default();
        let session = session(&engine).await;
        let base = SemanticQuery::new("earth:Region").unwrap();

        ContextResolver::default()
            .resolve_context(&session, &base, &extent())
            .await
            .unwrap();

        let submitted = engine
            .events()
            .into_iter()
            .find_map(|e| match e {
                MockEvent::ContextSubmitted { observable, geometry } => Some((observable, geometry)),
                _ => None,
            })
            .unwrap();
        assert_eq!(submitted.0, "earth:Region");
        assert!(submitted.1.contains("tunit=YEAR"));
        assert!(submitted.1.contains("proj=EPSG:4326"));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_context_failure_is_wrapped() {
        let engine = MockEngine::default();
        engine.fail_context("extent not covered");
        let session = session(&engine).await;
        let base = SemanticQuery::new("earth:Region").unwrap();

        let err = ContextResolver::default()
            .resolve_context(&session, &base, &extent())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ContextResolutionError);
        assert!(err.to_string().contains("extent not covered"));
        assert!(!engine
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::ObservableSubmitted { .. })));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_observable_failure_keeps_message() {
        let engine = MockEngine::default();
        engine.fail_observable("no model for im:Nothing");
        let session = session(&engine).await;
        let base = SemanticQuery::new("earth:Region").unwrap();
        let query = SemanticQuery::new("im:Nothing").unwrap();

        let context = ContextResolver::default()
            .resolve_context(&session, &base, &extent())
            .await
            .unwrap();
        let err = ObservableResolver::default()
            .resolve_observable(&context, &query)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ObservableResolutionError);
        assert!(err.to_string().contains("no model for im:Nothing"));

        drop(context);
        session.close().await.unwrap();
    }
}
