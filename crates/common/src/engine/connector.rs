//! Ordered failover across connection candidates

use super::{ConnectionCandidate, EngineSession, Session, SessionFactory};
use crate::errors::{AppError, EngineError, Result};
use crate::metrics::record_connection_attempt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type Opening = JoinHandle<std::result::Result<Box<dyn EngineSession>, EngineError>>;

/// Establishes a session by trying candidates strictly in order
#[derive(Clone)]
pub struct EngineConnector {
    factory: Arc<dyn SessionFactory>,
    open_timeout: Duration,
}

impl EngineConnector {
    pub fn new(factory: Arc<dyn SessionFactory>, open_timeout: Duration) -> Self {
        Self {
            factory,
            open_timeout,
        }
    }

    /// Return the first session that opens and answers its liveness probe.
    ///
    /// Failed attempts never stop the search, and sessions that open but are
    /// offline are closed before the next candidate is tried.
    pub async fn connect(&self, candidates: &[ConnectionCandidate]) -> Result<Session> {
        let mut attempts = 0;

        for candidate in candidates {
            attempts += 1;
            let kind = candidate.kind.as_str();
            info!(attempt = attempts, candidate = kind, "Trying engine connection");

            let mut opening: Opening = {
                let factory = Arc::clone(&self.factory);
                let candidate = candidate.clone();
                tokio::spawn(async move { factory.open(&candidate).await })
            };

            let waited = tokio::time::timeout(self.open_timeout, &mut opening).await;
            let opened = match waited {
                Ok(Ok(opened)) => opened,
                Ok(Err(e)) => Err(EngineError::Transport {
                    message: format!("session open task failed: {}", e),
                }),
                Err(_) => {
                    release_late_session(opening, kind);
                    Err(EngineError::Transport {
                        message: format!("no session within {}s", self.open_timeout.as_secs()),
                    })
                }
            };

            let inner = match opened {
                Ok(inner) => inner,
                Err(e) => {
                    warn!(attempt = attempts, candidate = kind, error = %e, "Engine connection failed");
                    record_connection_attempt(kind, "construction_failed");
                    continue;
                }
            };

            if inner.is_online().await {
                info!(
                    attempt = attempts,
                    candidate = kind,
                    endpoint = %inner.endpoint(),
                    session = %inner.id(),
                    "Engine connection established"
                );
                record_connection_attempt(kind, "connected");
                return Ok(Session::new(inner, candidate.kind));
            }

            warn!(
                attempt = attempts,
                candidate = kind,
                endpoint = %inner.endpoint(),
                "Engine session opened but is not online"
            );
            record_connection_attempt(kind, "offline");
            if let Err(e) = inner.close().await {
                warn!(candidate = kind, error = %e, "Failed to release offline session");
            }
        }

        error!(attempts, "No engine candidate produced a live session");
        Err(AppError::Connection { attempts })
    }
}

/// Close, in the background, a session whose open finishes after the
/// connector stopped waiting for it
fn release_late_session(opening: Opening, kind: &'static str) {
    tokio::spawn(async move {
        if let Ok(Ok(session)) = opening.await {
            warn!(candidate = kind, session = %session.id(), "Releasing session that opened after timeout");
            if let Err(e) = session.close().await {
                warn!(candidate = kind, error = %e, "Failed to release late session");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{CandidateScript, MockEngine, MockEvent};
    use crate::engine::CandidateKind;

    fn connector(engine: &MockEngine) -> EngineConnector {
        EngineConnector::new(Arc::new(engine.clone()), Duration::from_secs(5))
    }

    fn defaults() -> Vec<ConnectionCandidate> {
        vec![
            ConnectionCandidate::remote("/home/user/.klab/testcredentials.properties"),
            ConnectionCandidate::local(),
        ]
    }

    #[tokio::test]
    async fn test_first_live_candidate_wins() {
        let engine = MockEngine::default();
        let session = connector(&engine).connect(&defaults()).await.unwrap();

        assert_eq!(session.kind(), CandidateKind::Remote);
        // Local never attempted
        assert_eq!(engine.attempts(), vec![CandidateKind::Remote]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_failure_falls_over_to_local() {
        let engine = MockEngine::default();
        engine.script(CandidateKind::Remote, CandidateScript::refuse());

        let session = connector(&engine).connect(&defaults()).await.unwrap();

        assert_eq!(session.kind(), CandidateKind::Local);
        assert_eq!(engine.attempts(), vec![CandidateKind::Remote, CandidateKind::Local]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_session_is_released() {
        let engine = MockEngine::default();
        engine.script(CandidateKind::Remote, CandidateScript::offline());

        let session = connector(&engine).connect(&defaults()).await.unwrap();

        assert_eq!(session.kind(), CandidateKind::Local);
        assert_eq!(engine.live_sessions(), 1);
        assert!(engine
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::Closed(CandidateKind::Remote))));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let engine = MockEngine::default();
        engine.script(CandidateKind::Remote, CandidateScript::offline());
        engine.script(CandidateKind::Local, CandidateScript::refuse());

        let err = connector(&engine).connect(&defaults()).await.unwrap_err();

        assert!(matches!(err, AppError::Connection { attempts: 2 }));
        assert_eq!(engine.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_candidate_order_is_respected() {
        let engine = MockEngine::default();
        let reversed = vec![ConnectionCandidate::local(), ConnectionCandidate::remote("/tmp/c")];

        let session = connector(&engine).connect(&reversed).await.unwrap();

        assert_eq!(session.kind(), CandidateKind::Local);
        assert_eq!(engine.attempts(), vec![CandidateKind::Local]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let engine = MockEngine::default();
        let err = connector(&engine).connect(&[]).await.unwrap_err();
        assert!(matches!(err, AppError::Connection { attempts: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_session_is_released() {
        let engine = MockEngine::default();
        engine.script(CandidateKind::Remote, CandidateScript::slow(Duration::from_secs(30)));

        let session = connector(&engine).connect(&defaults()).await.unwrap();
        assert_eq!(session.kind(), CandidateKind::Local);

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(engine.live_sessions(), 1);
        assert!(engine
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::Closed(CandidateKind::Remote))));
        session.close().await.unwrap();
        assert_eq!(engine.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_candidate_times_out() {
        let engine = MockEngine::default();
        engine.script(CandidateKind::Remote, CandidateScript::hang());

        let session = connector(&engine).connect(&defaults()).await.unwrap();

        assert_eq!(session.kind(), CandidateKind::Local);
        session.close().await.unwrap();
    }
}
