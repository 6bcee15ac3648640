//! Single-provider pipeline with bounded retry and ordered fallback.

use super::{instrumented, BoxFut, Pipeline, SharedPipeline};
use crate::cache::ResponseCache;
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::options::{PipelineOption, PipelineOptions};
use crate::provider::{Provider, StreamHandler};
use crate::types::{Request, Response, ResponseChunk};
use serde_json::{json, Value};
use std::sync::Arc;

/// Call `provider` under the retry and fallback policy in `options`.
///
/// The primary gets up to `options.attempts()` tries. Only transient errors
/// (rate limit, deadline) continue the loop; anything else, or an explicit
/// cancellation, ends it early. Each fallback is then tried once, in order.
/// A fallback success replaces the error; fallback failures are discarded in
/// favor of the primary's wrapped error.
pub(crate) async fn call_with_policy(
    pipeline: &str,
    provider: &Arc<dyn Provider>,
    options: &PipelineOptions,
    ctx: &ExecCtx,
    request: &Request,
) -> Result<Response> {
    let attempts = options.attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        match ctx.guard(provider.generate_response(ctx, request)).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                let retry = attempt < attempts && e.is_transient() && !ctx.is_cancelled();
                if retry {
                    tracing::debug!(
                        pipeline,
                        provider = provider.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "retrying provider call"
                    );
                    emit(
                        &ctx.event_handler,
                        Event::Retry {
                            name: pipeline.to_string(),
                            provider: provider.name().to_string(),
                            attempt: attempt + 1,
                            reason: e.to_string(),
                        },
                    );
                }
                last_error = Some(e);
                if !retry {
                    break;
                }
            }
        }
    }

    let error = last_error
        .unwrap_or_else(|| PipelineError::Other("no attempt was made".to_string()))
        .wrap("execute", format!("{} via {}", pipeline, provider.name()));

    for fallback in &options.fallbacks {
        tracing::warn!(
            pipeline,
            primary = provider.name(),
            fallback = fallback.name(),
            "primary provider exhausted, trying fallback"
        );
        emit(
            &ctx.event_handler,
            Event::Fallback {
                name: pipeline.to_string(),
                provider: fallback.name().to_string(),
                reason: error.to_string(),
            },
        );
        match ctx.guard(fallback.generate_response(ctx, request)).await {
            Ok(response) => {
                return Ok(response.with_metadata("fallback_from", json!(provider.name())))
            }
            Err(e) => {
                tracing::debug!(pipeline, fallback = fallback.name(), error = %e, "fallback failed");
            }
        }
    }

    Err(error)
}

/// A pipeline over exactly one provider.
///
/// # Example
///
/// ```
/// use llm_ensemble::pipeline::{Pipeline, SimplePipeline};
/// use llm_ensemble::provider::MockProvider;
/// use llm_ensemble::ExecCtx;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let pipeline = SimplePipeline::new(Arc::new(MockProvider::fixed("m", "hello")));
/// let out = pipeline.execute(&ExecCtx::new(), "hi").await.unwrap();
/// assert_eq!(out, "hello");
/// # });
/// ```
#[derive(Clone)]
pub struct SimplePipeline {
    name: String,
    provider: Arc<dyn Provider>,
    options: PipelineOptions,
    cache: Option<Arc<ResponseCache>>,
}

impl SimplePipeline {
    /// A pipeline named after its provider, with default options.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        let name = provider.name().to_string();
        Self::named(name, provider)
    }

    pub fn named(name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            provider,
            options: PipelineOptions::default(),
            cache: None,
        }
    }

    /// Replace the options wholesale (builder style).
    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.cache = options.cache_ttl.map(|ttl| Arc::new(ResponseCache::new(ttl)));
        self.options = options;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        let cache_key = self
            .cache
            .as_ref()
            .map(|_| ResponseCache::key(self.provider.name(), &request));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                emit(
                    &ctx.event_handler,
                    Event::CacheHit {
                        name: self.name.clone(),
                    },
                );
                return Ok(hit.with_metadata("cached", Value::Bool(true)));
            }
        }

        let mut response =
            call_with_policy(&self.name, &self.provider, &self.options, ctx, &request).await?;

        if let (Some(call), Some(executor)) = (&response.function_call, &request.function_executor)
        {
            let result = executor(call).map_err(|e| {
                PipelineError::Transform {
                    name: call.name.clone(),
                    message: e.to_string(),
                }
                .wrap("function_call", self.name.clone())
            })?;
            response.metadata.insert("function_result".to_string(), result);
        }

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, response.clone());
        }
        Ok(response)
    }

    /// Stream the primary provider's answer into `handler`.
    ///
    /// The handler receives exactly one terminal chunk: chunks after a final
    /// one are swallowed, and a final chunk is synthesized if the provider
    /// ends without one. A handler error aborts the stream. Streaming does
    /// not retry or fall back.
    pub async fn execute_streaming(
        &self,
        ctx: &ExecCtx,
        request: Request,
        handler: StreamHandler<'_>,
    ) -> Result<()> {
        let mut saw_final = false;
        let mut handler_failed = false;

        let result = {
            let mut forward = |chunk: ResponseChunk| -> Result<()> {
                if saw_final {
                    return Ok(());
                }
                saw_final = chunk.is_final;
                handler(chunk).map_err(|e| {
                    handler_failed = true;
                    PipelineError::Stream(e.to_string())
                })
            };
            ctx.guard(
                self.provider
                    .generate_streaming_response(ctx, &request, &mut forward),
            )
            .await
        };

        match result {
            Ok(()) => {
                if !saw_final {
                    handler(ResponseChunk::final_chunk())?;
                }
                Ok(())
            }
            Err(e) => {
                if !saw_final && !handler_failed {
                    // The stream is already failing; the terminal chunk is best effort.
                    let _ = handler(ResponseChunk::error(e.to_string()));
                }
                Err(e.wrap("execute_streaming", self.name.clone()))
            }
        }
    }
}

impl Pipeline for SimplePipeline {
    fn kind(&self) -> &'static str {
        "simple"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, "simple", self.run(ctx, request)))
    }

    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline {
        Arc::new(
            self.clone()
                .with_pipeline_options(self.options.apply(options)),
        )
    }
}

impl std::fmt::Debug for SimplePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimplePipeline")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FnEventHandler;
    use crate::provider::{MockProvider, MockReply};
    use crate::types::FunctionCall;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn mock(p: MockProvider) -> Arc<MockProvider> {
        Arc::new(p)
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let primary = mock(MockProvider::new(
            "p",
            vec![
                MockReply::RateLimited,
                MockReply::RateLimited,
                MockReply::Text("ok".into()),
            ],
        ));
        let pipeline = SimplePipeline::new(primary.clone())
            .with_pipeline_options(PipelineOptions::builder().max_retries(3).build());

        let out = pipeline.execute(&ExecCtx::new(), "q").await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test]
    async fn test_default_makes_single_attempt() {
        let primary = mock(MockProvider::new(
            "p",
            vec![MockReply::RateLimited, MockReply::Text("ok".into())],
        ));
        let pipeline = SimplePipeline::new(primary.clone());
        let err = pipeline.execute(&ExecCtx::new(), "q").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits() {
        let primary = mock(MockProvider::failing("p", "bad key"));
        let pipeline = SimplePipeline::new(primary.clone())
            .with_pipeline_options(PipelineOptions::builder().max_retries(5).build());
        let err = pipeline.execute(&ExecCtx::new(), "q").await.unwrap_err();
        assert_eq!(primary.calls(), 1);
        let msg = err.to_string();
        assert!(msg.contains("execute failed in pipeline 'p via p'"));
        assert!(msg.contains("bad key"));
    }

    #[tokio::test]
    async fn test_fallback_used_after_primary_fails() {
        let primary = mock(MockProvider::failing("p", "down"));
        let fallback = mock(MockProvider::fixed("f", "from fallback"));
        let pipeline = SimplePipeline::new(primary.clone()).with_pipeline_options(
            PipelineOptions::builder()
                .max_retries(3)
                .fallback(fallback.clone())
                .build(),
        );
        let resp = pipeline
            .execute_with_request(&ExecCtx::new(), Request::new("q"))
            .await
            .unwrap();
        assert_eq!(resp.content, "from fallback");
        assert_eq!(resp.metadata["fallback_from"], json!("p"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_runs_after_all_retries() {
        let primary = mock(MockProvider::new("p", vec![MockReply::RateLimited]));
        let fallback = mock(MockProvider::fixed("f", "fb"));
        let pipeline = SimplePipeline::new(primary.clone()).with_pipeline_options(
            PipelineOptions::builder()
                .max_retries(3)
                .fallback(fallback.clone())
                .build(),
        );
        assert_eq!(pipeline.execute(&ExecCtx::new(), "q").await.unwrap(), "fb");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_cascading_fallbacks_in_order() {
        let primary = mock(MockProvider::failing("p", "down"));
        let f1 = mock(MockProvider::failing("f1", "also down"));
        let f2 = mock(MockProvider::fixed("f2", "second fallback"));
        let pipeline = SimplePipeline::new(primary).with_pipeline_options(
            PipelineOptions::builder()
                .fallback(f1.clone())
                .fallback(f2.clone())
                .build(),
        );
        assert_eq!(
            pipeline.execute(&ExecCtx::new(), "q").await.unwrap(),
            "second fallback"
        );
        assert_eq!(f1.calls(), 1);
        assert_eq!(f2.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_fallback_returns_primary_error() {
        let primary = mock(MockProvider::failing("p", "primary broke"));
        let fallback = mock(MockProvider::failing("f", "fallback broke"));
        let pipeline = SimplePipeline::new(primary)
            .with_pipeline_options(PipelineOptions::builder().fallback(fallback).build());
        let err = pipeline.execute(&ExecCtx::new(), "q").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("primary broke"));
        assert!(!msg.contains("fallback broke"));
    }

    #[tokio::test]
    async fn test_with_options_is_copy_on_write() {
        let primary = mock(MockProvider::failing("p", "down"));
        let fallback = mock(MockProvider::fixed("f", "fb"));
        let original = SimplePipeline::new(primary);
        let upgraded = original.with_options(&[PipelineOption::Fallback(fallback)]);

        assert!(original.execute(&ExecCtx::new(), "q").await.is_err());
        assert_eq!(upgraded.execute(&ExecCtx::new(), "q").await.unwrap(), "fb");
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_requests() {
        let primary = mock(MockProvider::fixed("p", "answer"));
        let pipeline = SimplePipeline::new(primary.clone()).with_pipeline_options(
            PipelineOptions::builder()
                .cache(Duration::from_secs(60))
                .build(),
        );
        let ctx = ExecCtx::new();
        let first = pipeline
            .execute_with_request(&ctx, Request::new("q"))
            .await
            .unwrap();
        let second = pipeline
            .execute_with_request(&ctx, Request::new("q"))
            .await
            .unwrap();
        assert_eq!(primary.calls(), 1);
        assert!(!first.metadata.contains_key("cached"));
        assert_eq!(second.metadata["cached"], json!(true));
        assert_eq!(second.content, "answer");
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_retries() {
        let primary = mock(MockProvider::fixed("p", "never"));
        let pipeline = SimplePipeline::new(primary.clone())
            .with_pipeline_options(PipelineOptions::builder().max_retries(3).build());
        let ctx = ExecCtx::new();
        ctx.cancel();
        let err = pipeline.execute(&ctx, "q").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_retry_events_emitted() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let ctx = ExecCtx::builder()
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                if let Event::Retry { attempt, .. } = e {
                    sink.lock().push(attempt);
                }
            })))
            .build();
        let primary = mock(MockProvider::new(
            "p",
            vec![
                MockReply::Timeout,
                MockReply::RateLimited,
                MockReply::Text("ok".into()),
            ],
        ));
        let pipeline = SimplePipeline::new(primary)
            .with_pipeline_options(PipelineOptions::builder().max_retries(3).build());
        pipeline.execute(&ctx, "q").await.unwrap();
        assert_eq!(*events.lock(), vec![2, 3]);
    }

    struct CallingProvider;

    #[async_trait::async_trait]
    impl Provider for CallingProvider {
        async fn generate_response(&self, _ctx: &ExecCtx, _req: &Request) -> Result<Response> {
            Ok(Response::new("", "caller", "m").with_function_call(FunctionCall {
                name: "add".into(),
                arguments: json!({"a": 2, "b": 3}),
            }))
        }

        async fn generate_streaming_response(
            &self,
            _ctx: &ExecCtx,
            _req: &Request,
            handler: StreamHandler<'_>,
        ) -> Result<()> {
            handler(ResponseChunk::content("partial"))
        }

        fn name(&self) -> &str {
            "caller"
        }

        fn model(&self) -> &str {
            "m"
        }
    }

    #[tokio::test]
    async fn test_function_call_executed() {
        let pipeline = SimplePipeline::new(Arc::new(CallingProvider));
        let request = Request::new("add").with_function_executor(|call| {
            let a = call.arguments["a"].as_i64().unwrap_or(0);
            let b = call.arguments["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        });
        let resp = pipeline
            .execute_with_request(&ExecCtx::new(), request)
            .await
            .unwrap();
        assert_eq!(resp.metadata["function_result"], json!(5));
    }

    #[tokio::test]
    async fn test_streaming_synthesizes_final_chunk() {
        let pipeline = SimplePipeline::new(Arc::new(CallingProvider));
        let mut chunks = Vec::new();
        pipeline
            .execute_streaming(&ExecCtx::new(), Request::new("x"), &mut |c| {
                chunks.push(c);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "partial");
        assert!(chunks[1].is_final);
    }

    #[tokio::test]
    async fn test_streaming_error_sends_terminal_error_chunk() {
        let pipeline = SimplePipeline::new(Arc::new(MockProvider::failing("p", "nope")));
        let mut chunks = Vec::new();
        let res = pipeline
            .execute_streaming(&ExecCtx::new(), Request::new("x"), &mut |c| {
                chunks.push(c);
                Ok(())
            })
            .await;
        assert!(res.is_err());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_final);
        assert!(chunks[0].error.as_deref().unwrap().contains("nope"));
    }
}
