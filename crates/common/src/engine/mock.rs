//! In-memory scripted engine.
//!
//! Used by tests and by the `mock` engine provider. Every interaction is
//! recorded as a `MockEvent` so callers can assert on ordering, and live
//! sessions are counted to catch leaks.

use super::{
    CandidateKind, ConnectionCandidate, ContextHandle, DatasetHandle, DatasetInfo, DatasetShape,
    EngineSession, SessionFactory, SessionId,
};
use crate::errors::EngineError;
use crate::export::ExportFormat;
use crate::spatial::GeometryDescriptor;
use crate::ticket::TicketFuture;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type EngineResult<T> = std::result::Result<T, EngineError>;

/// Bytes served for every export unless overridden: a little-endian TIFF header
const DEFAULT_PAYLOAD: &[u8] = b"II*\x00\x08\x00\x00\x00mock-raster";

/// Something that happened inside the mock engine
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Attempted(CandidateKind),
    Opened(CandidateKind),
    ContextSubmitted { observable: String, geometry: String },
    ContextResolved,
    ObservableSubmitted { context: String, observable: String },
    ObservableResolved,
    Exported { format: ExportFormat },
    Closed(CandidateKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBehaviour {
    Accept,
    Refuse,
    Hang,
    Slow(Duration),
}

/// How a candidate behaves when the connector tries it
#[derive(Debug, Clone, Copy)]
pub struct CandidateScript {
    open: OpenBehaviour,
    online: bool,
}

impl CandidateScript {
    /// Opens and reports online
    pub fn live() -> Self {
        Self {
            open: OpenBehaviour::Accept,
            online: true,
        }
    }

    /// Fails during construction
    pub fn refuse() -> Self {
        Self {
            open: OpenBehaviour::Refuse,
            online: false,
        }
    }

    /// Opens but fails the liveness probe
    pub fn offline() -> Self {
        Self {
            open: OpenBehaviour::Accept,
            online: false,
        }
    }

    /// Never finishes opening
    pub fn hang() -> Self {
        Self {
            open: OpenBehaviour::Hang,
            online: false,
        }
    }

    /// Opens a live session, but only after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            open: OpenBehaviour::Slow(delay),
            online: true,
        }
    }
}

struct MockState {
    scripts: HashMap<CandidateKind, CandidateScript>,
    context_failure: Option<String>,
    observable_failure: Option<String>,
    export_failure: Option<String>,
    shape: DatasetShape,
    payload: Bytes,
    events: Vec<MockEvent>,
    live: usize,
    closed: usize,
    next_id: usize,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            scripts: HashMap::new(),
            context_failure: None,
            observable_failure: None,
            export_failure: None,
            shape: DatasetShape::Raster,
            payload: Bytes::from_static(DEFAULT_PAYLOAD),
            events: Vec::new(),
            live: 0,
            closed: 0,
            next_id: 0,
        }
    }
}

/// Scripted engine; clones share state
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockEngine {
    /// Change how a candidate kind behaves (default: live)
    pub fn script(&self, kind: CandidateKind, script: CandidateScript) {
        lock(&self.state).scripts.insert(kind, script);
    }

    /// Make the context ticket fail with `message`
    pub fn fail_context(&self, message: impl Into<String>) {
        lock(&self.state).context_failure = Some(message.into());
    }

    /// Make the observable ticket fail with `message`
    pub fn fail_observable(&self, message: impl Into<String>) {
        lock(&self.state).observable_failure = Some(message.into());
    }

    /// Make export requests fail with `message`
    pub fn fail_export(&self, message: impl Into<String>) {
        lock(&self.state).export_failure = Some(message.into());
    }

    pub fn set_shape(&self, shape: DatasetShape) {
        lock(&self.state).shape = shape;
    }

    pub fn set_payload(&self, payload: impl Into<Bytes>) {
        lock(&self.state).payload = payload.into();
    }

    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.state).events.clone()
    }

    /// Candidate kinds in the order they were tried
    pub fn attempts(&self) -> Vec<CandidateKind> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                MockEvent::Attempted(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn live_sessions(&self) -> usize {
        lock(&self.state).live
    }

    pub fn closed_sessions(&self) -> usize {
        lock(&self.state).closed
    }

    /// Position of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&MockEvent) -> bool) -> Option<usize> {
        lock(&self.state).events.iter().position(predicate)
    }

    fn record(&self, event: MockEvent) {
        lock(&self.state).events.push(event);
    }
}

#[async_trait]
impl SessionFactory for MockEngine {
    async fn open(&self, candidate: &ConnectionCandidate) -> EngineResult<Box<dyn EngineSession>> {
        let script = {
            let mut state = lock(&self.state);
            state.events.push(MockEvent::Attempted(candidate.kind));
            state
                .scripts
                .get(&candidate.kind)
                .copied()
                .unwrap_or_else(CandidateScript::live)
        };

        match script.open {
            OpenBehaviour::Refuse => {
                return Err(EngineError::Transport {
                    message: format!("mock {} engine refused connection", candidate.kind.as_str()),
                })
            }
            OpenBehaviour::Hang => return futures::future::pending().await,
            OpenBehaviour::Slow(delay) => tokio::time::sleep(delay).await,
            OpenBehaviour::Accept => {}
        }

        let id = {
            let mut state = lock(&self.state);
            state.live += 1;
            state.events.push(MockEvent::Opened(candidate.kind));
            state.next_id("session")
        };
        Ok(Box::new(MockSession {
            id: SessionId(id),
            kind: candidate.kind,
            endpoint: format!("mock://{}", candidate.kind.as_str()),
            online: script.online,
            engine: self.clone(),
        }))
    }
}

struct MockSession {
    id: SessionId,
    kind: CandidateKind,
    endpoint: String,
    online: bool,
    engine: MockEngine,
}

#[async_trait]
impl EngineSession for MockSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_online(&self) -> bool {
        self.online
    }

    async fn submit_context(
        &self,
        observable: &str,
        geometry: &GeometryDescriptor,
    ) -> EngineResult<TicketFuture<ContextHandle>> {
        let (ticket, context_id, failure) = {
            let mut state = lock(&self.engine.state);
            state.events.push(MockEvent::ContextSubmitted {
                observable: observable.to_string(),
                geometry: geometry.to_string(),
            });
            (
                state.next_id("ticket"),
                state.next_id("ctx"),
                state.context_failure.clone(),
            )
        };

        let engine = self.engine.clone();
        let session = self.id.clone();
        let ticket_id = ticket.clone();
        Ok(TicketFuture::new(ticket, async move {
            tokio::task::yield_now().await;
            match failure {
                Some(message) => Err(EngineError::TicketFailed {
                    ticket: ticket_id,
                    message,
                }),
                None => {
                    engine.record(MockEvent::ContextResolved);
                    Ok(ContextHandle {
                        session,
                        id: context_id,
                    })
                }
            }
        }))
    }

    async fn submit_observable(
        &self,
        context: &ContextHandle,
        observable: &str,
    ) -> EngineResult<TicketFuture<DatasetInfo>> {
        let (ticket, dataset_id, failure, shape) = {
            let mut state = lock(&self.engine.state);
            state.events.push(MockEvent::ObservableSubmitted {
                context: context.id.clone(),
                observable: observable.to_string(),
            });
            (
                state.next_id("ticket"),
                state.next_id("ds"),
                state.observable_failure.clone(),
                state.shape,
            )
        };

        let engine = self.engine.clone();
        let handle = DatasetHandle {
            session: self.id.clone(),
            context: context.id.clone(),
            id: dataset_id,
        };
        let ticket_id = ticket.clone();
        Ok(TicketFuture::new(ticket, async move {
            tokio::task::yield_now().await;
            match failure {
                Some(message) => Err(EngineError::TicketFailed {
                    ticket: ticket_id,
                    message,
                }),
                None => {
                    engine.record(MockEvent::ObservableResolved);
                    Ok(DatasetInfo { handle, shape })
                }
            }
        }))
    }

    async fn export(
        &self,
        _dataset: &DatasetHandle,
        format: ExportFormat,
    ) -> EngineResult<Bytes> {
        let mut state = lock(&self.engine.state);
        if let Some(message) = state.export_failure.clone() {
            return Err(EngineError::Rejected {
                status: 500,
                body: message,
            });
        }
        state.events.push(MockEvent::Exported { format });
        Ok(state.payload.clone())
    }

    async fn close(&self) -> EngineResult<()> {
        let mut state = lock(&self.engine.state);
        state.live = state.live.saturating_sub(1);
        state.closed += 1;
        state.events.push(MockEvent::Closed(self.kind));
        Ok(())
    }
}
