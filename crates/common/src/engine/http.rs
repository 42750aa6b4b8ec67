//! Engine client speaking the modeler REST API
//!
//! Remote sessions authenticate with the bearer token from a credentials
//! file; local sessions are anonymous. Tickets are retrieved by polling.

use super::credentials::Credentials;
use super::{
    CandidateKind, ConnectionCandidate, ContextHandle, DatasetHandle, DatasetInfo, DatasetShape,
    EngineSession, SessionFactory, SessionId,
};
use crate::config::EngineConfig;
use crate::errors::{AppError, EngineError, Result};
use crate::export::ExportFormat;
use crate::spatial::GeometryDescriptor;
use crate::ticket::TicketFuture;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type EngineResult<T> = std::result::Result<T, EngineError>;

const SESSION_HEADER: &str = "X-Session";

#[derive(Debug, Clone, Copy)]
struct PollSchedule {
    initial: Duration,
    max: Duration,
}

/// Opens sessions against remote and local engines over HTTP
pub struct HttpSessionFactory {
    client: reqwest::Client,
    remote_url: String,
    local_url: String,
    poll: PollSchedule,
}

#[derive(Serialize)]
struct OpenRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Deserialize)]
struct OpenResponse {
    session: String,
}

#[derive(Deserialize)]
struct CapabilitiesResponse {
    #[serde(default)]
    online: bool,
}

#[derive(Serialize)]
struct ContextRequest<'a> {
    observable: &'a str,
    geometry: String,
}

#[derive(Serialize)]
struct ObserveRequest<'a> {
    observable: &'a str,
}

#[derive(Deserialize)]
struct TicketResponse {
    ticket: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum TicketStatus {
    Open,
    Resolved,
    Error,
}

#[derive(Deserialize)]
struct TicketReport {
    status: TicketStatus,
    #[serde(default)]
    result: Option<TicketArtifact>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TicketArtifact {
    id: String,
    #[serde(default)]
    shape: Option<DatasetShape>,
}

impl HttpSessionFactory {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("failed to build engine HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            remote_url: trim_base(&config.remote_url),
            local_url: trim_base(&config.local_url),
            poll: PollSchedule {
                initial: Duration::from_millis(config.poll_initial_ms.max(1)),
                max: Duration::from_millis(config.poll_max_ms.max(config.poll_initial_ms).max(1)),
            },
        })
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self, candidate: &ConnectionCandidate) -> EngineResult<Box<dyn EngineSession>> {
        let (base, credentials) = match candidate.kind {
            CandidateKind::Remote => {
                let path = candidate
                    .credentials_path
                    .as_deref()
                    .ok_or_else(|| EngineError::Credentials {
                        message: "remote candidate has no credentials file".to_string(),
                    })?;
                let credentials = Credentials::load(path).await?;
                let base = credentials
                    .engine_url
                    .clone()
                    .unwrap_or_else(|| self.remote_url.clone());
                (base, Some(credentials))
            }
            CandidateKind::Local => (self.local_url.clone(), None),
        };

        debug!(endpoint = %base, candidate = candidate.kind.as_str(), "Opening engine session");

        let mut request = self.client.post(format!("{}/api/session", base));
        if let Some(credentials) = &credentials {
            request = request.bearer_auth(&credentials.token);
        }
        let response = request
            .json(&OpenRequest {
                username: credentials.as_ref().and_then(|c| c.username.as_deref()),
                token: credentials.as_ref().map(|c| c.token.as_str()),
            })
            .send()
            .await?;
        let opened: OpenResponse = decode(response).await?;

        Ok(Box::new(HttpEngineSession {
            transport: Arc::new(Transport {
                client: self.client.clone(),
                base,
                token: credentials.map(|c| c.token),
                session: SessionId(opened.session),
                poll: self.poll,
            }),
        }))
    }
}

/// State shared between a session and its in-flight tickets
struct Transport {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
    session: SessionId,
    poll: PollSchedule,
}

impl Transport {
    fn url(&self, path: &str) -> String {
        format!("{}/api/session/{}{}", self.base, self.session, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(SESSION_HEADER, &self.session.0);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn submit<B: Serialize + Sync>(&self, path: &str, body: &B) -> EngineResult<String> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        let ticket: TicketResponse = decode(response).await?;
        Ok(ticket.ticket)
    }

    async fn capabilities(&self) -> EngineResult<CapabilitiesResponse> {
        let url = format!("{}/api/capabilities", self.base);
        let response = self.authorize(self.client.get(url)).send().await?;
        decode(response).await
    }

    /// Poll a ticket until it leaves the open state
    async fn poll_ticket(&self, ticket: &str) -> EngineResult<TicketArtifact> {
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.poll.initial)
            .with_max_interval(self.poll.max)
            .with_max_elapsed_time(None)
            .build();
        let url = self.url(&format!("/ticket/{}", ticket));

        loop {
            let response = self.authorize(self.client.get(&url)).send().await?;
            let report: TicketReport = decode(response).await?;

            match report.status {
                TicketStatus::Resolved => {
                    return report.result.ok_or_else(|| EngineError::Protocol {
                        message: format!("ticket {} resolved without a result", ticket),
                    });
                }
                TicketStatus::Error => {
                    return Err(EngineError::TicketFailed {
                        ticket: ticket.to_string(),
                        message: report
                            .error
                            .unwrap_or_else(|| "engine reported an error".to_string()),
                    });
                }
                TicketStatus::Open => {
                    let delay = schedule.next_backoff().unwrap_or(self.poll.max);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Fail on non-2xx, then parse the JSON body
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> EngineResult<T> {
    let response = check(response).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| EngineError::Protocol {
        message: e.to_string(),
    })
}

async fn check(response: reqwest::Response) -> EngineResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::Rejected {
        status: status.as_u16(),
        body,
    })
}

pub struct HttpEngineSession {
    transport: Arc<Transport>,
}

#[async_trait]
impl EngineSession for HttpEngineSession {
    fn id(&self) -> &SessionId {
        &self.transport.session
    }

    fn endpoint(&self) -> &str {
        &self.transport.base
    }

    async fn is_online(&self) -> bool {
        match self.transport.capabilities().await {
            Ok(capabilities) => capabilities.online,
            Err(e) => {
                debug!(endpoint = %self.transport.base, error = %e, "Liveness probe failed");
                false
            }
        }
    }

    async fn submit_context(
        &self,
        observable: &str,
        geometry: &GeometryDescriptor,
    ) -> EngineResult<TicketFuture<ContextHandle>> {
        let ticket = self
            .transport
            .submit(
                "/context",
                &ContextRequest {
                    observable,
                    geometry: geometry.to_string(),
                },
            )
            .await?;

        let transport = self.transport.clone();
        let ticket_id = ticket.clone();
        Ok(TicketFuture::new(ticket, async move {
            let artifact = transport.poll_ticket(&ticket_id).await?;
            Ok(ContextHandle {
                session: transport.session.clone(),
                id: artifact.id,
            })
        }))
    }

    async fn submit_observable(
        &self,
        context: &ContextHandle,
        observable: &str,
    ) -> EngineResult<TicketFuture<DatasetInfo>> {
        let ticket = self
            .transport
            .submit(
                &format!("/context/{}/observe", context.id),
                &ObserveRequest { observable },
            )
            .await?;

        let transport = self.transport.clone();
        let context_id = context.id.clone();
        let ticket_id = ticket.clone();
        Ok(TicketFuture::new(ticket, async move {
            let artifact = transport.poll_ticket(&ticket_id).await?;
            Ok(DatasetInfo {
                handle: DatasetHandle {
                    session: transport.session.clone(),
                    context: context_id,
                    id: artifact.id,
                },
                shape: artifact.shape.unwrap_or(DatasetShape::Raster),
            })
        }))
    }

    async fn export(&self, dataset: &DatasetHandle, format: ExportFormat) -> EngineResult<Bytes> {
        let transport = &self.transport;
        let response = transport
            .authorize(transport.client.get(transport.url(&format!("/export/{}", dataset.id))))
            .query(&[("target", "data"), ("format", format.as_str())])
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?)
    }

    async fn close(&self) -> EngineResult<()> {
        let transport = &self.transport;
        let response = transport
            .authorize(transport.client.delete(transport.url("")))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
