//! Imperative construction of pipelines from provider names.
//!
//! [`PipelineFactory`] resolves names through an injected
//! [`ProviderRegistry`], layering provider settings as
//! factory default < caller base config < per-provider override.
//! [`PipelineBuilder`] is the fluent front end over the same factory.

use crate::combiner::{BestPickerCombiner, ResultCombiner};
use crate::error::{PipelineError, Result};
use crate::options::{PipelineOption, PipelineOptions};
use crate::pipeline::{
    BalanceStrategy, BalancedPipeline, CollaborativePipeline, FunctionAdapter, ParallelPipeline,
    SerialPipeline, SharedPipeline, SimplePipeline, TransformAdapter, TransformFn,
};
use crate::provider::{Provider, ProviderConfig, ProviderRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds any pipeline shape from registered provider names.
///
/// # Example
///
/// ```
/// use llm_ensemble::factory::PipelineFactory;
/// use llm_ensemble::combiner::MajorityVoteCombiner;
/// use llm_ensemble::pipeline::Pipeline;
/// use llm_ensemble::provider::{MockProvider, ProviderRegistry};
/// use llm_ensemble::ExecCtx;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let registry = Arc::new(ProviderRegistry::new());
/// registry.register(Arc::new(MockProvider::fixed("a", "yes")));
/// registry.register(Arc::new(MockProvider::fixed("b", "yes")));
/// registry.register(Arc::new(MockProvider::fixed("c", "no")));
///
/// let factory = PipelineFactory::new(registry);
/// let vote = factory
///     .create_parallel("vote", &["a", "b", "c"], Arc::new(MajorityVoteCombiner::new()))
///     .unwrap();
/// assert_eq!(vote.execute(&ExecCtx::new(), "?").await.unwrap(), "yes");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct PipelineFactory {
    registry: Arc<ProviderRegistry>,
    default_config: ProviderConfig,
    provider_configs: HashMap<String, ProviderConfig>,
}

impl PipelineFactory {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            default_config: ProviderConfig::default(),
            provider_configs: HashMap::new(),
        }
    }

    /// Settings applied to every provider this factory builds.
    pub fn with_default_config(mut self, config: ProviderConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Settings for one provider, layered over the default.
    pub fn with_provider_config(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.provider_configs.insert(name.into(), config);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The effective config for `name`, with `base` between the factory
    /// default and the per-provider override.
    pub fn config_for(&self, name: &str, base: Option<&ProviderConfig>) -> ProviderConfig {
        let mut config = self.default_config.clone();
        if let Some(base) = base {
            config = config.overlay(base);
        }
        if let Some(specific) = self.provider_configs.get(name) {
            config = config.overlay(specific);
        }
        config
    }

    pub fn provider(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.provider_with(name, None)
    }

    pub fn provider_with(
        &self,
        name: &str,
        base: Option<&ProviderConfig>,
    ) -> Result<Arc<dyn Provider>> {
        self.registry.create(name, &self.config_for(name, base))
    }

    pub fn providers<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<dyn Provider>>> {
        names.iter().map(|n| self.provider(n.as_ref())).collect()
    }

    pub fn create_simple(&self, provider: &str) -> Result<SimplePipeline> {
        Ok(SimplePipeline::new(self.provider(provider)?))
    }

    /// One simple stage per provider, chained in the given order.
    pub fn create_serial<S: AsRef<str>>(&self, name: &str, providers: &[S]) -> Result<SerialPipeline> {
        let stages = self
            .providers(providers)?
            .into_iter()
            .map(|p| Arc::new(SimplePipeline::new(p)) as SharedPipeline)
            .collect();
        SerialPipeline::new(name, stages)
    }

    pub fn create_parallel<S: AsRef<str>>(
        &self,
        name: &str,
        providers: &[S],
        combiner: Arc<dyn ResultCombiner>,
    ) -> Result<ParallelPipeline> {
        ParallelPipeline::new(name, self.providers(providers)?, combiner)
    }

    pub fn create_parallel_with_best_picker<S: AsRef<str>>(
        &self,
        name: &str,
        providers: &[S],
        judge: &str,
    ) -> Result<ParallelPipeline> {
        let judge = self.provider(judge)?;
        self.create_parallel(name, providers, Arc::new(BestPickerCombiner::new(judge)))
    }

    pub fn create_collaborative<S: AsRef<str>>(
        &self,
        name: &str,
        providers: &[S],
        rounds: usize,
    ) -> Result<CollaborativePipeline> {
        CollaborativePipeline::new(name, self.providers(providers)?, rounds)
    }

    /// `primary` with every fallback tried once, in order, after it gives up.
    pub fn create_fallback<S: AsRef<str>>(
        &self,
        primary: &str,
        fallbacks: &[S],
    ) -> Result<SimplePipeline> {
        let options = self
            .providers(fallbacks)?
            .into_iter()
            .fold(PipelineOptions::builder(), |b, p| b.fallback(p))
            .build();
        Ok(self.create_simple(primary)?.with_pipeline_options(options))
    }

    /// `instances` independently built copies of `provider`, one used per call.
    pub fn create_balanced(
        &self,
        name: &str,
        provider: &str,
        instances: usize,
        strategy: BalanceStrategy,
    ) -> Result<BalancedPipeline> {
        let pipelines = (0..instances)
            .map(|i| {
                self.provider(provider).map(|p| {
                    Arc::new(SimplePipeline::named(format!("{}#{}", provider, i), p))
                        as SharedPipeline
                })
            })
            .collect::<Result<Vec<_>>>()?;
        BalancedPipeline::new(name, pipelines, strategy)
    }

    pub fn create_nested(&self, name: &str, pipelines: Vec<SharedPipeline>) -> Result<SerialPipeline> {
        SerialPipeline::nested(name, pipelines)
    }

    /// Wrap `inner` with optional input and output transforms.
    pub fn create_transform(
        &self,
        name: &str,
        inner: SharedPipeline,
        input: Option<(String, TransformFn)>,
        output: Option<(String, TransformFn)>,
    ) -> Result<TransformAdapter> {
        if input.is_none() && output.is_none() {
            return Err(PipelineError::InvalidConfig(format!(
                "transform pipeline '{}' has neither an input nor an output transform",
                name
            )));
        }
        let mut adapter = TransformAdapter::new(name, inner);
        if let Some((label, f)) = input {
            adapter = adapter.with_input_fn(label, f);
        }
        if let Some((label, f)) = output {
            adapter = adapter.with_output_fn(label, f);
        }
        Ok(adapter)
    }

    /// A serial pipeline of pure text transforms, applied in order.
    pub fn create_chain_of_transforms(
        &self,
        name: &str,
        transforms: Vec<(String, TransformFn)>,
    ) -> Result<SerialPipeline> {
        let stages = transforms
            .into_iter()
            .map(|(label, f)| {
                Arc::new(FunctionAdapter::text(label, move |s: &str| f(s))) as SharedPipeline
            })
            .collect();
        SerialPipeline::new(name, stages)
    }

    /// Start a fluent build.
    pub fn builder(&self, name: impl Into<String>) -> PipelineBuilder<'_> {
        PipelineBuilder::new(self, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Simple,
    Serial,
    Parallel,
    Collaborative { rounds: usize },
    Balanced { instances: usize, strategy: BalanceStrategy },
}

/// Fluent pipeline construction over a [`PipelineFactory`].
///
/// Provider and fallback names are resolved in [`build`](Self::build), so
/// an unknown name surfaces there as [`PipelineError::NotFound`].
///
/// ```
/// use llm_ensemble::factory::PipelineFactory;
/// use llm_ensemble::provider::{MockProvider, MockReply, ProviderRegistry};
/// use llm_ensemble::pipeline::Pipeline;
/// use llm_ensemble::ExecCtx;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let registry = Arc::new(ProviderRegistry::new());
/// registry.register(Arc::new(MockProvider::new("flaky", vec![MockReply::RateLimited])));
/// registry.register(Arc::new(MockProvider::fixed("backup", "saved")));
///
/// let factory = PipelineFactory::new(registry);
/// let pipeline = factory
///     .builder("ha")
///     .provider("flaky")
///     .max_retries(2)
///     .fallback("backup")
///     .build()
///     .unwrap();
/// assert_eq!(pipeline.execute(&ExecCtx::new(), "hi").await.unwrap(), "saved");
/// # });
/// ```
pub struct PipelineBuilder<'f> {
    factory: &'f PipelineFactory,
    name: String,
    shape: Shape,
    providers: Vec<String>,
    combiner: Option<Arc<dyn ResultCombiner>>,
    judge: Option<String>,
    synthesizer: Option<String>,
    max_retries: Option<u32>,
    fallbacks: Vec<String>,
    cache: Option<Duration>,
    input: Option<(String, TransformFn)>,
    output: Option<(String, TransformFn)>,
}

impl<'f> PipelineBuilder<'f> {
    pub fn new(factory: &'f PipelineFactory, name: impl Into<String>) -> Self {
        Self {
            factory,
            name: name.into(),
            shape: Shape::Simple,
            providers: Vec::new(),
            combiner: None,
            judge: None,
            synthesizer: None,
            max_retries: None,
            fallbacks: Vec::new(),
            cache: None,
            input: None,
            output: None,
        }
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.providers.push(name.into());
        self
    }

    pub fn providers<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.providers.extend(names.into_iter().map(Into::into));
        self
    }

    /// Chain the providers as serial stages.
    pub fn serial(mut self) -> Self {
        self.shape = Shape::Serial;
        self
    }

    /// Fan out to every provider and reduce with `combiner`.
    pub fn parallel(mut self, combiner: Arc<dyn ResultCombiner>) -> Self {
        self.shape = Shape::Parallel;
        self.combiner = Some(combiner);
        self
    }

    /// Fan out and let the `judge` provider pick the best answer.
    pub fn best_picker(mut self, judge: impl Into<String>) -> Self {
        self.shape = Shape::Parallel;
        self.judge = Some(judge.into());
        self
    }

    pub fn collaborative(mut self, rounds: usize) -> Self {
        self.shape = Shape::Collaborative { rounds };
        self
    }

    /// Summarize a collaborative discussion with this provider.
    pub fn synthesizer(mut self, name: impl Into<String>) -> Self {
        self.synthesizer = Some(name.into());
        self
    }

    pub fn balanced(mut self, instances: usize, strategy: BalanceStrategy) -> Self {
        self.shape = Shape::Balanced {
            instances,
            strategy,
        };
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn fallback(mut self, name: impl Into<String>) -> Self {
        self.fallbacks.push(name.into());
        self
    }

    pub fn cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(ttl);
        self
    }

    pub fn input_transform(
        mut self,
        label: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.input = Some((label.into(), Arc::new(f)));
        self
    }

    pub fn output_transform(
        mut self,
        label: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.output = Some((label.into(), Arc::new(f)));
        self
    }

    fn single_provider(&self) -> Result<&str> {
        match self.providers.as_slice() {
            [one] => Ok(one),
            other => Err(PipelineError::InvalidConfig(format!(
                "pipeline '{}' needs exactly one provider, got {}",
                self.name,
                other.len()
            ))),
        }
    }

    pub fn build(self) -> Result<SharedPipeline> {
        let factory = self.factory;
        let name = self.name.as_str();

        let base: SharedPipeline = match self.shape {
            Shape::Simple => Arc::new(SimplePipeline::named(
                name,
                factory.provider(self.single_provider()?)?,
            )),
            Shape::Serial => Arc::new(factory.create_serial(name, self.providers.as_slice())?),
            Shape::Parallel => {
                let combiner: Arc<dyn ResultCombiner> = match (&self.combiner, &self.judge) {
                    (_, Some(judge)) => Arc::new(BestPickerCombiner::new(factory.provider(judge)?)),
                    (Some(combiner), None) => combiner.clone(),
                    (None, None) => {
                        return Err(PipelineError::InvalidConfig(format!(
                            "parallel pipeline '{}' has no combiner",
                            name
                        )))
                    }
                };
                Arc::new(factory.create_parallel(name, self.providers.as_slice(), combiner)?)
            }
            Shape::Collaborative { rounds } => {
                let mut collab = factory.create_collaborative(name, self.providers.as_slice(), rounds)?;
                if let Some(synth) = &self.synthesizer {
                    collab = collab.with_synthesizer(factory.provider(synth)?);
                }
                Arc::new(collab)
            }
            Shape::Balanced {
                instances,
                strategy,
            } => Arc::new(factory.create_balanced(
                name,
                self.single_provider()?,
                instances,
                strategy,
            )?),
        };

        let mut options = Vec::new();
        if let Some(n) = self.max_retries {
            options.push(PipelineOption::MaxRetries(n));
        }
        for fallback in &self.fallbacks {
            options.push(PipelineOption::Fallback(factory.provider(fallback)?));
        }
        if let Some(ttl) = self.cache {
            options.push(PipelineOption::Cache(ttl));
        }
        let pipeline = if options.is_empty() {
            base
        } else {
            base.with_options(&options)
        };

        if self.input.is_none() && self.output.is_none() {
            return Ok(pipeline);
        }
        let transform_name = format!("{}:transform", name);
        Ok(Arc::new(factory.create_transform(
            &transform_name,
            pipeline,
            self.input,
            self.output,
        )?))
    }
}

impl std::fmt::Debug for PipelineBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("providers", &self.providers)
            .field("fallbacks", &self.fallbacks)
            .finish()
    }
}
