//! Core pipeline trait and the concrete pipeline shapes.
//!
//! A [`Pipeline`] maps a prompt or [`Request`] to a [`Response`]. Pipelines
//! are immutable value graphs: they are built once, shared behind
//! `Arc<dyn Pipeline>`, and every `execute*` call is stateless over that
//! graph. Changing options produces a new pipeline via
//! [`Pipeline::with_options`].
//!
//! | Shape | Type |
//! |---|---|
//! | one provider, retry + fallback | [`SimplePipeline`] |
//! | fan-out + combiner | [`ParallelPipeline`] |
//! | ordered stages | [`SerialPipeline`] |
//! | multi-round discussion | [`CollaborativePipeline`] |
//! | plain functions / transforms | [`FunctionAdapter`], [`TransformAdapter`] |
//! | one-of-N instance selection | [`BalancedPipeline`] |

pub mod adapter;
pub mod balanced;
pub mod collaborative;
pub mod parallel;
pub mod serial;
pub mod simple;

pub use adapter::{FunctionAdapter, TransformAdapter, TransformFn};
pub use balanced::{BalanceStrategy, BalancedPipeline};
pub use collaborative::{CollaborativePipeline, Discussion, Round};
pub use parallel::{ParallelPipeline, ParallelPipelineBuilder};
pub use serial::SerialPipeline;
pub use simple::SimplePipeline;

use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::options::PipelineOption;
use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, pinned, Send future -- the return type of [`Pipeline`] methods.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A shareable pipeline handle.
pub type SharedPipeline = Arc<dyn Pipeline>;

/// Object-safe trait for composable pipelines.
///
/// The trait is object-safe so pipelines can be stored as `Arc<dyn Pipeline>`
/// and nested inside each other without generic constraints.
pub trait Pipeline: Send + Sync {
    /// Stable identifier for the pipeline type (e.g. `"simple"`, `"parallel"`).
    fn kind(&self) -> &'static str;

    /// Instance name (for logging, events, and error messages).
    fn name(&self) -> &str;

    /// Execute against a full request.
    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>>;

    /// Execute a bare prompt and return only the text.
    fn execute<'a>(&'a self, ctx: &'a ExecCtx, prompt: &'a str) -> BoxFut<'a, Result<String>> {
        Box::pin(async move {
            let response = self.execute_with_request(ctx, Request::new(prompt)).await?;
            Ok(response.content)
        })
    }

    /// A new pipeline with `options` applied on top of this one's. The
    /// receiver is left untouched.
    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline;
}

/// Wrap one pipeline run with start/end events and debug logging.
pub(crate) async fn instrumented<F>(
    ctx: &ExecCtx,
    name: &str,
    kind: &'static str,
    fut: F,
) -> Result<Response>
where
    F: Future<Output = Result<Response>>,
{
    tracing::debug!(pipeline = %name, kind, "pipeline start");
    emit(
        &ctx.event_handler,
        Event::PipelineStart {
            name: name.to_string(),
            kind,
        },
    );
    let result = fut.await;
    match &result {
        Ok(_) => tracing::debug!(pipeline = %name, kind, "pipeline finished"),
        Err(e) => tracing::debug!(pipeline = %name, kind, error = %e, "pipeline failed"),
    }
    emit(
        &ctx.event_handler,
        Event::PipelineEnd {
            name: name.to_string(),
            ok: result.is_ok(),
        },
    );
    result
}
