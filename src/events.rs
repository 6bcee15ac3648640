//! Event system for pipeline lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe pipeline execution.
//! Pipelines emit events when they start and finish, when a provider call is
//! retried or handed to a fallback, when a parallel branch is dropped, and
//! when a collaborative round begins. Implement [`EventHandler`] to receive
//! them for progress tracking or UIs.

use std::sync::Arc;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A pipeline has started executing.
    PipelineStart {
        /// Instance name of the pipeline.
        name: String,
        /// Stable type identifier (e.g. `"simple"`, `"parallel"`).
        kind: &'static str,
    },
    /// A pipeline has finished executing.
    PipelineEnd {
        name: String,
        /// Whether execution succeeded.
        ok: bool,
    },
    /// A provider call failed transiently and is being retried.
    Retry {
        name: String,
        provider: String,
        /// The attempt about to run (2-indexed: the first retry is attempt 2).
        attempt: u32,
        reason: String,
    },
    /// The primary provider gave up and a fallback is being tried.
    Fallback {
        name: String,
        provider: String,
        reason: String,
    },
    /// A parallel branch failed and was dropped.
    BranchFailed {
        name: String,
        provider: String,
        error: String,
    },
    /// A collaborative discussion round is starting.
    RoundStart {
        name: String,
        /// Round number (1-indexed).
        round: usize,
        total: usize,
    },
    /// A cached response was served.
    CacheHit { name: String },
}

/// Handler for pipeline lifecycle events.
///
/// # Example
///
/// ```
/// use llm_ensemble::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::PipelineStart { name, kind } => println!("[start] {} ({})", name, kind),
///             Event::PipelineEnd { name, ok } => println!("[end] {} ok={}", name, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when a pipeline emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
