//! Tickets for pending engine computations
//!
//! A ticket is created when work has already been dispatched to the engine.
//! Awaiting it only retrieves the outcome, never re-submits, and can be done
//! any number of times: every await observes the same value or the same
//! failure.

use crate::errors::EngineError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::time::Duration;

pub type TicketResult<T> = std::result::Result<T, EngineError>;

/// Observable state of a ticket, without driving it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Resolved,
    Failed,
}

/// Pending engine computation yielding `T`.
///
/// Cloning a ticket shares the underlying computation.
#[derive(Clone)]
pub struct TicketFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: String,
    inner: Shared<BoxFuture<'static, TicketResult<T>>>,
}

impl<T> TicketFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap the retrieval of an already-dispatched computation
    pub fn new<F>(id: impl Into<String>, retrieval: F) -> Self
    where
        F: Future<Output = TicketResult<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            inner: retrieval.boxed().shared(),
        }
    }

    /// Ticket that is already resolved
    pub fn resolved(id: impl Into<String>, value: T) -> Self {
        Self::new(id, futures::future::ready(Ok(value)))
    }

    /// Ticket that has already failed
    pub fn failed(id: impl Into<String>, error: EngineError) -> Self {
        Self::new(id, futures::future::ready(Err(error)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state. A ticket only reports a terminal state once some
    /// await has driven it to completion.
    pub fn state(&self) -> TicketState {
        match self.inner.peek() {
            None => TicketState::Pending,
            Some(Ok(_)) => TicketState::Resolved,
            Some(Err(_)) => TicketState::Failed,
        }
    }

    /// Wait for the outcome
    pub async fn await_result(&self) -> TicketResult<T> {
        self.inner.clone().await
    }

    /// Wait at most `timeout`. On expiry the wait is abandoned and reported
    /// as `TimedOut`; the engine-side computation is not stopped and the
    /// ticket can still be awaited later.
    pub async fn await_within(&self, timeout: Duration) -> TicketResult<T> {
        match tokio::time::timeout(timeout, self.await_result()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    ticket = %self.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Abandoned wait on ticket; engine work continues"
                );
                Err(EngineError::TimedOut {
                    ticket: self.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// `await_within` when a timeout is configured, `await_result` otherwise
    pub async fn await_with(&self, timeout: Option<Duration>) -> TicketResult<T> {
        match timeout {
            Some(timeout) => self.await_within(timeout).await,
            None => self.await_result().await,
        }
    }
}

impl<T> std::fmt::Debug for TicketFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketFuture")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_await_twice_returns_same_value() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let ticket = TicketFuture::new("t-1", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, EngineError>("ctx-42".to_string())
        });

        assert_eq!(ticket.state(), TicketState::Pending);
        let first = ticket.await_result().await.unwrap();
        let second = ticket.await_result().await.unwrap();

        assert_eq!(first, "ctx-42");
        assert_eq!(first, second);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert_eq!(ticket.state(), TicketState::Resolved);
    }

    #[tokio::test]
    async fn test_await_twice_on_failure() {
        let error = EngineError::TicketFailed {
            ticket: "t-2".into(),
            message: "no observation for earth:Nothing".into(),
        };
        let ticket: TicketFuture<String> = TicketFuture::failed("t-2", error.clone());

        assert_eq!(ticket.await_result().await.unwrap_err(), error);
        assert_eq!(ticket.await_result().await.unwrap_err(), error);
        assert_eq!(ticket.state(), TicketState::Failed);
    }

    #[tokio::test]
    async fn test_clones_share_outcome() {
        let ticket = TicketFuture::resolved("t-3", 7u32);
        let clone = ticket.clone();
        assert_eq!(clone.await_result().await.unwrap(), 7);
        assert_eq!(ticket.state(), TicketState::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_wait_only() {
        let ticket = TicketFuture::new("t-4", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, EngineError>(1u8)
        });

        let err = ticket
            .await_within(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TimedOut { timeout_ms: 1000, .. }));
        assert_eq!(ticket.state(), TicketState::Pending);

        // The computation is still there to be collected
        assert_eq!(ticket.await_result().await.unwrap(), 1);
    }

    #[test]
    fn test_state_is_pending_until_driven() {
        let ticket = TicketFuture::resolved("t-6", 3u8);
        assert_eq!(ticket.state(), TicketState::Pending);

        let mut wait = tokio_test::task::spawn(ticket.await_result());
        let value = tokio_test::assert_ready!(wait.poll());
        assert_eq!(value.unwrap(), 3);
        assert_eq!(ticket.state(), TicketState::Resolved);
    }

    #[tokio::test]
    async fn test_await_with_none_waits() {
        let ticket = TicketFuture::resolved("t-5", "ok");
        assert_eq!(ticket.await_with(None).await.unwrap(), "ok");
        assert_eq!(
            ticket.await_with(Some(Duration::from_secs(1))).await.unwrap(),
            "ok"
        );
    }
}
