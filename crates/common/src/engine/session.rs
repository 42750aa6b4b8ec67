//! Owned handle hierarchy: `Session` owns `Context` owns `Dataset`.
//!
//! Contexts borrow their session and datasets borrow their context, so the
//! borrow checker rejects any use after `Session::close`. Handles also carry
//! the identity of their owner, which is checked before anything reaches the
//! engine.

use super::{
    CandidateKind, ContextHandle, DatasetHandle, DatasetInfo, DatasetShape, EngineSession,
    SessionId,
};
use crate::errors::EngineError;
use crate::export::ExportFormat;
use crate::resolve::SemanticQuery;
use crate::spatial::GeometryDescriptor;
use crate::ticket::TicketFuture;
use bytes::Bytes;
use tracing::{debug, warn};

type EngineResult<T> = std::result::Result<T, EngineError>;

/// A live engine session, exclusively owned by one execution
pub struct Session {
    inner: Box<dyn EngineSession>,
    kind: CandidateKind,
    closed: bool,
}

impl Session {
    pub(crate) fn new(inner: Box<dyn EngineSession>, kind: CandidateKind) -> Self {
        Self {
            inner,
            kind,
            closed: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        self.inner.id()
    }

    pub fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    /// Which candidate produced this session
    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    pub async fn submit_context(
        &self,
        observable: &SemanticQuery,
        geometry: &GeometryDescriptor,
    ) -> EngineResult<TicketFuture<ContextHandle>> {
        debug!(session = %self.id(), observable = %observable, "Submitting context");
        self.inner.submit_context(observable.as_str(), geometry).await
    }

    /// Adopt a context handle produced by this session
    pub fn context(&self, handle: ContextHandle) -> EngineResult<Context<'_>> {
        if &handle.session != self.id() {
            return Err(EngineError::ForeignHandle {
                handle: handle.id,
                session: self.id().to_string(),
            });
        }
        Ok(Context {
            session: self,
            handle,
        })
    }

    /// Release the connection. Consumes the session, so it runs at most once.
    pub async fn close(mut self) -> EngineResult<()> {
        let outcome = self.inner.close().await;
        self.closed = true;
        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                session = %self.inner.id(),
                endpoint = %self.inner.endpoint(),
                "Session dropped without being closed"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", self.id())
            .field("endpoint", &self.endpoint())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Resolved spatial/temporal frame, valid while its session is
#[derive(Debug)]
pub struct Context<'s> {
    session: &'s Session,
    handle: ContextHandle,
}

impl<'s> Context<'s> {
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// Dispatch an observable in this context
    pub async fn submit(&self, query: &SemanticQuery) -> EngineResult<TicketFuture<DatasetInfo>> {
        debug!(
            session = %self.session.id(),
            context = %self.handle.id,
            query = %query,
            "Submitting observable"
        );
        self.session
            .inner
            .submit_observable(&self.handle, query.as_str())
            .await
    }

    /// Adopt a dataset produced inside this context
    pub fn dataset(&self, info: DatasetInfo) -> EngineResult<Dataset<'_>> {
        let owned = &info.handle.session == self.session.id() && info.handle.context == self.handle.id;
        if !owned {
            return Err(EngineError::ForeignHandle {
                handle: info.handle.id,
                session: self.session.id().to_string(),
            });
        }
        Ok(Dataset { context: self, info })
    }
}

/// Resolved data, valid while its context is
#[derive(Debug)]
pub struct Dataset<'c> {
    context: &'c Context<'c>,
    info: DatasetInfo,
}

impl<'c> Dataset<'c> {
    pub fn handle(&self) -> &DatasetHandle {
        &self.info.handle
    }

    pub fn shape(&self) -> DatasetShape {
        self.info.shape
    }

    /// Fetch the dataset payload in `format`
    pub async fn fetch(&self, format: ExportFormat) -> EngineResult<Bytes> {
        self.context
            .session
            .inner
            .export(&self.info.handle, format)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::engine::{ConnectionCandidate, SessionFactory};

    async fn open_local(engine: &MockEngine) -> Session {
        let inner = engine.open(&ConnectionCandidate::local()).await.unwrap();
        Session::new(inner, CandidateKind::Local)
    }

    #[tokio::test]
    async fn test_foreign_context_rejected() {
        let engine = MockEngine::default();
        let session = open_local(&engine).await;

        let err = session
            .context(ContextHandle {
                session: SessionId("someone-else".into()),
                id: "ctx-1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ForeignHandle { .. }));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_dataset_rejected() {
        let engine = MockEngine::default();
        let session = open_local(&engine).await;
        let context = session
            .context(ContextHandle {
                session: session.id().clone(),
                id: "ctx-1".into(),
            })
            .unwrap();

        let err = context
            .dataset(DatasetInfo {
                handle: DatasetHandle {
                    session: session.id().clone(),
                    context: "ctx-2".into(),
                    id: "ds-1".into(),
                },
                shape: DatasetShape::Raster,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ForeignHandle { .. }));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_once() {
        let engine = MockEngine::default();
        let session = open_local(&engine).await;
        assert_eq!(engine.live_sessions(), 1);

        session.close().await.unwrap();
        assert_eq!(engine.live_sessions(), 0);
        assert_eq!(engine.closed_sessions(), 1);
    }
}
