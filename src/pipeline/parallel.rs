//! Parallel fan-out over several providers, reduced by a [`ResultCombiner`].
//!
//! Each provider runs on its own tokio task under a child context of the
//! caller's. Results arrive over a channel sized to the branch count, which
//! closes once every task has dropped its sender. Arrival order is
//! completion order, not submission order; every response carries its
//! submission index under [`BRANCH_INDEX_KEY`] for combiners that need it.

use super::simple::call_with_policy;
use super::{instrumented, BoxFut, Pipeline, SharedPipeline};
use crate::combiner::ResultCombiner;
use crate::error::{BranchFailure, PipelineError, Result};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::options::{PipelineOption, PipelineOptions};
use crate::provider::Provider;
use crate::types::{Request, Response};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Metadata key holding a branch's submission index.
pub const BRANCH_INDEX_KEY: &str = "branch_index";

/// Metadata key listing providers dropped from a partially failed fan-out.
pub const FAILED_PROVIDERS_KEY: &str = "failed_providers";

/// Outcome of one fan-out: successes in arrival order plus recorded failures.
#[derive(Debug, Default)]
pub(crate) struct FanOut {
    pub responses: Vec<Response>,
    pub failures: Vec<BranchFailure>,
}

/// Run every `(provider, request)` branch concurrently and collect results.
///
/// Dropping the returned future cancels the branches still in flight.
pub(crate) async fn fan_out(
    pipeline: &str,
    ctx: &ExecCtx,
    branches: Vec<(Arc<dyn Provider>, Request)>,
    options: &PipelineOptions,
) -> FanOut {
    let total = branches.len();
    let child = ctx.child();
    let _cancel_on_drop = child.token().clone().drop_guard();
    let names: Vec<String> = branches.iter().map(|(p, _)| p.name().to_string()).collect();

    let (tx, mut rx) = mpsc::channel(total.max(1));
    for (index, (provider, request)) in branches.into_iter().enumerate() {
        let tx = tx.clone();
        let ctx = child.clone();
        let options = options.clone();
        let pipeline = pipeline.to_string();
        tokio::spawn(async move {
            let result = call_with_policy(&pipeline, &provider, &options, &ctx, &request).await;
            // The receiver only goes away if the caller was dropped.
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut out = FanOut::default();
    let mut reported = vec![false; total];
    while let Some((index, result)) = rx.recv().await {
        reported[index] = true;
        match result {
            Ok(response) => out
                .responses
                .push(response.with_metadata(BRANCH_INDEX_KEY, json!(index))),
            Err(e) => {
                tracing::warn!(pipeline, provider = %names[index], error = %e, "branch failed");
                emit(
                    &ctx.event_handler,
                    Event::BranchFailed {
                        name: pipeline.to_string(),
                        provider: names[index].clone(),
                        error: e.to_string(),
                    },
                );
                out.failures.push(BranchFailure {
                    provider: names[index].clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    for (index, seen) in reported.iter().enumerate() {
        if !seen {
            out.failures.push(BranchFailure {
                provider: names[index].clone(),
                error: "branch task aborted before reporting".to_string(),
            });
        }
    }
    out
}

/// Runs every provider concurrently and combines the successful answers.
///
/// Failed branches are dropped as long as one branch succeeds; their
/// providers are listed under [`FAILED_PROVIDERS_KEY`]. If every branch
/// fails, [`PipelineError::AllBranchesFailed`] is returned and the combiner
/// is never called. There is no early exit: all branches run to completion.
#[derive(Clone)]
pub struct ParallelPipeline {
    name: String,
    providers: Vec<Arc<dyn Provider>>,
    combiner: Arc<dyn ResultCombiner>,
    options: PipelineOptions,
}

impl ParallelPipeline {
    /// Fan out over `providers` and merge with `combiner`. Fails if
    /// `providers` is empty.
    pub fn new(
        name: impl Into<String>,
        providers: Vec<Arc<dyn Provider>>,
        combiner: Arc<dyn ResultCombiner>,
    ) -> Result<Self> {
        let name = name.into();
        if providers.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "parallel pipeline '{}' needs at least one provider",
                name
            )));
        }
        Ok(Self {
            name,
            providers,
            combiner,
            options: PipelineOptions::default(),
        })
    }

    /// Start a [`ParallelPipelineBuilder`].
    pub fn builder(name: impl Into<String>) -> ParallelPipelineBuilder {
        ParallelPipelineBuilder {
            name: name.into(),
            providers: Vec::new(),
            combiner: None,
            options: PipelineOptions::default(),
        }
    }

    /// Replace the per-branch retry and fallback options (builder style).
    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn combiner(&self) -> &Arc<dyn ResultCombiner> {
        &self.combiner
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        let branches = self
            .providers
            .iter()
            .map(|p| (p.clone(), request.clone()))
            .collect();
        let FanOut {
            responses,
            failures,
        } = fan_out(&self.name, ctx, branches, &self.options).await;

        if responses.is_empty() {
            return Err(PipelineError::AllBranchesFailed {
                pipeline: self.name.clone(),
                failures,
            });
        }

        let mut combined = self
            .combiner
            .combine(ctx, responses)
            .await
            .map_err(|e| e.wrap("combine", self.name.clone()))?;
        if !failures.is_empty() {
            combined
                .metadata
                .insert(FAILED_PROVIDERS_KEY.to_string(), json!(failures));
        }
        Ok(combined)
    }
}

impl Pipeline for ParallelPipeline {
    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, "parallel", self.run(ctx, request)))
    }

    /// Retry and fallback apply to each branch. Cache options are kept but
    /// never consulted; cache at the stage level instead.
    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline {
        let options = self.options.apply(options);
        Arc::new(self.clone().with_pipeline_options(options))
    }
}

impl std::fmt::Debug for ParallelPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelPipeline")
            .field("name", &self.name)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("combiner", &self.combiner.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`ParallelPipeline`]; `build` fails without a combiner.
pub struct ParallelPipelineBuilder {
    name: String,
    providers: Vec<Arc<dyn Provider>>,
    combiner: Option<Arc<dyn ResultCombiner>>,
    options: PipelineOptions,
}

impl ParallelPipelineBuilder {
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn combiner(mut self, combiner: Arc<dyn ResultCombiner>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<ParallelPipeline> {
        let combiner = self.combiner.ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "parallel pipeline '{}' has no combiner",
                self.name
            ))
        })?;
        Ok(ParallelPipeline::new(self.name, self.providers, combiner)?
            .with_pipeline_options(self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::{ConcatCombiner, MajorityVoteCombiner};
    use crate::provider::MockProvider;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records how many responses each combine call received.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ResultCombiner for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn combine(&self, _ctx: &ExecCtx, responses: Vec<Response>) -> Result<Response> {
            self.seen.lock().push(responses.len());
            Ok(responses.into_iter().next().unwrap_or_default())
        }
    }

    fn providers(specs: &[(&str, Option<&str>)]) -> Vec<Arc<dyn Provider>> {
        specs
            .iter()
            .map(|(name, text)| -> Arc<dyn Provider> {
                match text {
                    Some(t) => Arc::new(MockProvider::fixed(*name, *t)),
                    None => Arc::new(MockProvider::failing(*name, format!("{} exploded", name))),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_succeed_combiner_sees_all() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = ParallelPipeline::new(
            "fan",
            providers(&[("a", Some("1")), ("b", Some("2")), ("c", Some("3"))]),
            recorder.clone(),
        )
        .unwrap();
        pipeline.execute(&ExecCtx::new(), "q").await.unwrap();
        assert_eq!(*recorder.seen.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_partial_failure_drops_failed_branches() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = ParallelPipeline::new(
            "fan",
            providers(&[("a", Some("1")), ("b", None), ("c", Some("3"))]),
            recorder.clone(),
        )
        .unwrap();
        let resp = pipeline
            .execute_with_request(&ExecCtx::new(), Request::new("q"))
            .await
            .unwrap();
        assert_eq!(*recorder.seen.lock(), vec![2]);
        let failed = resp.metadata[FAILED_PROVIDERS_KEY].as_array().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["provider"], json!("b"));
    }

    #[tokio::test]
    async fn test_all_fail_aggregates_and_skips_combiner() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = ParallelPipeline::new(
            "fan",
            providers(&[("a", None), ("b", None), ("c", None)]),
            recorder.clone(),
        )
        .unwrap();
        let err = pipeline.execute(&ExecCtx::new(), "q").await.unwrap_err();
        assert!(recorder.seen.lock().is_empty());
        let msg = err.to_string();
        for name in ["a", "b", "c"] {
            assert!(msg.contains(&format!("{} exploded", name)), "missing {} in {}", name, msg);
        }
        match err {
            PipelineError::AllBranchesFailed { failures, .. } => assert_eq!(failures.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_concat_keeps_submission_order() {
        let slow: Arc<dyn Provider> =
            Arc::new(MockProvider::fixed("slow", "r1").with_delay(Duration::from_millis(50)));
        let fast: Arc<dyn Provider> = Arc::new(MockProvider::fixed("fast", "r2"));
        let pipeline =
            ParallelPipeline::new("fan", vec![slow, fast], Arc::new(ConcatCombiner::new(" | ")))
                .unwrap();
        assert_eq!(pipeline.execute(&ExecCtx::new(), "q").await.unwrap(), "r1 | r2");
    }

    #[tokio::test]
    async fn test_majority_vote_through_pipeline() {
        let pipeline = ParallelPipeline::new(
            "vote",
            providers(&[("a", Some("A")), ("b", Some("B")), ("c", Some("A"))]),
            Arc::new(MajorityVoteCombiner::new()),
        )
        .unwrap();
        let resp = pipeline
            .execute_with_request(&ExecCtx::new(), Request::new("q"))
            .await
            .unwrap();
        assert_eq!(resp.content, "A");
        assert_eq!(resp.metadata["votes"], json!(2));
    }

    #[tokio::test]
    async fn test_cancelled_context_never_combines() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = ParallelPipeline::new(
            "fan",
            providers(&[("a", Some("1")), ("b", Some("2"))]),
            recorder.clone(),
        )
        .unwrap();
        let ctx = ExecCtx::new();
        ctx.cancel();
        let err = pipeline.execute(&ctx, "q").await.unwrap_err();
        assert!(matches!(err, PipelineError::AllBranchesFailed { .. }));
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_no_providers_rejected() {
        let res = ParallelPipeline::new("fan", Vec::new(), Arc::new(ConcatCombiner::default()));
        assert!(matches!(res, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_requires_combiner() {
        let res = ParallelPipeline::builder("fan")
            .provider(Arc::new(MockProvider::fixed("a", "x")))
            .build();
        assert!(matches!(res, Err(PipelineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_branch_retry_options_apply() {
        let flaky: Arc<dyn Provider> = Arc::new(MockProvider::new(
            "flaky",
            vec![
                crate::provider::MockReply::RateLimited,
                crate::provider::MockReply::RateLimited,
                crate::provider::MockReply::Text("ok".into()),
            ],
        ));
        let pipeline = ParallelPipeline::new("fan", vec![flaky], Arc::new(ConcatCombiner::default()))
            .unwrap();
        assert!(pipeline.execute(&ExecCtx::new(), "q").await.is_err());
        let retrying = pipeline.with_options(&[PipelineOption::MaxRetries(2)]);
        assert_eq!(retrying.execute(&ExecCtx::new(), "q").await.unwrap(), "ok");
    }
}
