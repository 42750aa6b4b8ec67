//! Reasoning engine abstraction
//!
//! Provides:
//! - `EngineSession`: one live connection to an engine (remote or local)
//! - `SessionFactory`: turns a `ConnectionCandidate` into a session
//! - `EngineConnector`: ordered failover across candidates
//! - `Session`, `Context`, `Dataset`: the owned handle hierarchy used by
//!   the pipeline

mod connector;
pub mod credentials;
pub mod http;
pub mod mock;
mod session;

pub use connector::EngineConnector;
pub use session::{Context, Dataset, Session};

use crate::config::EngineConfig;
use crate::errors::{AppError, EngineError, Result};
use crate::export::ExportFormat;
use crate::spatial::GeometryDescriptor;
use crate::ticket::TicketFuture;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Engine-assigned session identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context identity, tagged with the session that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    pub session: SessionId,
    pub id: String,
}

/// Dataset identity, tagged with its session and context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetHandle {
    pub session: SessionId,
    pub context: String,
    pub id: String,
}

/// What a resolved dataset looks like, which decides the export formats it supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetShape {
    Raster,
    Vector,
    Scalar,
}

/// Resolved dataset as reported by a ticket
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub handle: DatasetHandle,
    pub shape: DatasetShape,
}

/// Strategy for obtaining a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    /// Remote engine authenticated with a credentials file
    Remote,
    /// Engine running on this machine, no credentials
    Local,
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::Remote => "remote",
            CandidateKind::Local => "local",
        }
    }
}

/// One entry of the ordered failover list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCandidate {
    pub kind: CandidateKind,
    pub credentials_path: Option<PathBuf>,
}

impl ConnectionCandidate {
    pub fn remote(credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: CandidateKind::Remote,
            credentials_path: Some(credentials_path.into()),
        }
    }

    pub fn local() -> Self {
        Self {
            kind: CandidateKind::Local,
            credentials_path: None,
        }
    }
}

/// One live connection to a reasoning engine.
///
/// Implementations are driven only through [`Session`], which checks handle
/// ownership before delegating.
#[async_trait]
pub trait EngineSession: Send + Sync {
    fn id(&self) -> &SessionId;

    /// Base URL or process description, for logs
    fn endpoint(&self) -> &str;

    /// Reachability probe run once right after construction
    async fn is_online(&self) -> bool;

    /// Dispatch a context request; the ticket yields the new context handle
    async fn submit_context(
        &self,
        observable: &str,
        geometry: &GeometryDescriptor,
    ) -> std::result::Result<TicketFuture<ContextHandle>, EngineError>;

    /// Dispatch an observable inside a context
    async fn submit_observable(
        &self,
        context: &ContextHandle,
        observable: &str,
    ) -> std::result::Result<TicketFuture<DatasetInfo>, EngineError>;

    /// Fetch the data payload of a resolved dataset
    async fn export(
        &self,
        dataset: &DatasetHandle,
        format: ExportFormat,
    ) -> std::result::Result<Bytes, EngineError>;

    async fn close(&self) -> std::result::Result<(), EngineError>;
}

/// Builds sessions for connection candidates
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        candidate: &ConnectionCandidate,
    ) -> std::result::Result<Box<dyn EngineSession>, EngineError>;
}

/// Create a session factory based on configuration
pub fn create_session_factory(config: &EngineConfig) -> Result<Arc<dyn SessionFactory>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(http::HttpSessionFactory::new(config)?)),
        "mock" => {
            tracing::warn!("Using in-memory mock engine; results are synthetic");
            Ok(Arc::new(mock::MockEngine::default()))
        }
        other => Err(AppError::Configuration {
            message: format!("unknown engine provider \"{}\" (expected http or mock)", other),
        }),
    }
}
