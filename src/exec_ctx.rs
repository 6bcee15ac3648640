//! Execution context shared across pipeline invocations.
//!
//! [`ExecCtx`] carries the cancellation token, an optional deadline, and an
//! optional event handler. It is cheap to clone; fan-out pipelines derive a
//! child context per invocation so cancelling the child never affects the
//! caller, while cancelling the caller reaches every branch.

use crate::error::{PipelineError, Result};
use crate::events::EventHandler;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared execution context for pipeline invocations.
///
/// # Example
///
/// ```
/// use llm_ensemble::ExecCtx;
/// use std::time::Duration;
///
/// let ctx = ExecCtx::builder()
///     .timeout(Duration::from_secs(30))
///     .build();
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct ExecCtx {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// A context with no deadline and no event handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder.
    pub fn builder() -> ExecCtxBuilder {
        ExecCtxBuilder::default()
    }

    /// Derive a context that is cancelled whenever this one is, but can also
    /// be cancelled on its own.
    pub fn child(&self) -> ExecCtx {
        ExecCtx {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            event_handler: self.event_handler.clone(),
        }
    }

    /// Request cancellation of this context and every child.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return an error if cancellation has been requested or the deadline passed.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if self.is_deadline_exceeded() {
            return Err(PipelineError::DeadlineExceeded);
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Run `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever happens first.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = deadline => Err(PipelineError::DeadlineExceeded),
            res = fut => res,
        }
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("cancelled", &self.is_cancelled())
            .field("remaining", &self.remaining())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
#[derive(Default)]
pub struct ExecCtxBuilder {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtxBuilder {
    /// Use an externally owned cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Absolute deadline for everything run under this context.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn build(self) -> ExecCtx {
        ExecCtx {
            cancel: self.cancel.unwrap_or_default(),
            deadline: self.deadline,
            event_handler: self.event_handler,
        }
    }
}
