//! Turns [`PipelineConfig`] descriptions into live pipelines.

use super::store::ConfigStore;
use super::{PipelineConfig, PipelineType};
use crate::combiner::{
    BestPickerCombiner, CombinerKind, ConcatCombiner, ConsensusCombiner, JuryCombiner,
    LongestResponseCombiner, MajorityVoteCombiner, QualityScoreCombiner, ResultCombiner,
    RoundRobinCombiner, VotingMethod,
};
use crate::error::{PipelineError, Result};
use crate::factory::PipelineFactory;
use crate::options::{PipelineOption, DEFAULT_CACHE_TTL};
use crate::pipeline::{
    BalancedPipeline, CollaborativePipeline, ParallelPipeline, SerialPipeline, SharedPipeline,
    SimplePipeline, TransformAdapter, TransformFn,
};
use crate::provider::{Provider, ProviderConfig};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Named text transforms that configs refer to by string.
///
/// [`TransformRegistry::new`] is seeded with `trim`, `lowercase`, and
/// `uppercase`.
pub struct TransformRegistry {
    transforms: RwLock<HashMap<String, TransformFn>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("trim", |s: &str| Ok(s.trim().to_string()));
        registry.register("lowercase", |s: &str| Ok(s.to_lowercase()));
        registry.register("uppercase", |s: &str| Ok(s.to_uppercase()));
        registry
    }

    pub fn empty() -> Self {
        Self {
            transforms: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) {
        self.transforms.write().insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Result<TransformFn> {
        self.transforms
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("transform '{}'", name)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

/// Builds pipeline graphs from configs, recursing into stages.
///
/// Provider settings layer as: factory default < each enclosing
/// `base_config` (outermost first) < the config's own `provider_configs`.
/// `options` layer the same way: a stage inherits every enclosing config's
/// options and its own are applied last, so they win.
///
/// # Example
///
/// ```
/// use llm_ensemble::config::ConfigFactory;
/// use llm_ensemble::factory::PipelineFactory;
/// use llm_ensemble::provider::{MockProvider, ProviderRegistry};
/// use llm_ensemble::ExecCtx;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let registry = Arc::new(ProviderRegistry::new());
/// registry.register(Arc::new(MockProvider::fixed("a", "  Hello  ")));
///
/// let configs = ConfigFactory::new(PipelineFactory::new(registry));
/// let pipeline = configs
///     .create_from_json(r#"{"name": "t", "type": "transform", "provider": "a", "output_transform": "trim"}"#)
///     .unwrap();
/// assert_eq!(pipeline.execute(&ExecCtx::new(), "hi").await.unwrap(), "Hello");
/// # });
/// ```
#[derive(Debug)]
pub struct ConfigFactory {
    factory: PipelineFactory,
    transforms: Arc<TransformRegistry>,
}

impl ConfigFactory {
    pub fn new(factory: PipelineFactory) -> Self {
        Self {
            factory,
            transforms: Arc::new(TransformRegistry::new()),
        }
    }

    pub fn with_transforms(mut self, transforms: Arc<TransformRegistry>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn factory(&self) -> &PipelineFactory {
        &self.factory
    }

    pub fn transforms(&self) -> &Arc<TransformRegistry> {
        &self.transforms
    }

    /// Validate `config` and build it.
    pub fn create_from_pipeline_config(&self, config: &PipelineConfig) -> Result<SharedPipeline> {
        config.validate()?;
        self.build(config, &ProviderConfig::default(), &[])
    }

    pub fn create_from_json(&self, json: &str) -> Result<SharedPipeline> {
        self.create_from_pipeline_config(&PipelineConfig::from_json(json)?)
    }

    #[cfg(feature = "yaml")]
    pub fn create_from_yaml(&self, yaml: &str) -> Result<SharedPipeline> {
        self.create_from_pipeline_config(&PipelineConfig::from_yaml(yaml)?)
    }

    /// Load the config saved under `name` and build it.
    pub fn create_from_store(&self, store: &dyn ConfigStore, name: &str) -> Result<SharedPipeline> {
        self.create_from_pipeline_config(&store.load(name)?)
    }

    fn build(
        &self,
        config: &PipelineConfig,
        inherited: &ProviderConfig,
        inherited_options: &[PipelineOption],
    ) -> Result<SharedPipeline> {
        let base = match &config.base_config {
            Some(own) => inherited.overlay(own),
            None => inherited.clone(),
        };
        let mut options = inherited_options.to_vec();
        options.extend(self.options(config, &base)?);
        let resolve = |name: &str| self.provider(config, &base, name);
        let resolve_all = |names: &[&str]| -> Result<Vec<Arc<dyn Provider>>> {
            names.iter().map(|n| resolve(n)).collect()
        };
        let providers = config.all_providers();
        let name = config.name.as_str();

        tracing::debug!(pipeline = %name, kind = %config.kind, "building pipeline from config");

        // Composite shapes hand the options down to their stages; every
        // other shape takes them directly.
        let composite = matches!(config.kind, PipelineType::Serial | PipelineType::Nested)
            || (config.kind == PipelineType::Transform && !config.stages.is_empty());

        let pipeline: SharedPipeline = match config.kind {
            PipelineType::Simple => Arc::new(SimplePipeline::named(name, resolve(providers[0])?)),
            PipelineType::Serial => {
                let mut stages: Vec<SharedPipeline> = resolve_all(&providers[..])?
                    .into_iter()
                    .map(|p| with_options(&options, Arc::new(SimplePipeline::new(p))))
                    .collect();
                for stage in &config.stages {
                    stages.push(self.build(stage, &base, &options)?);
                }
                Arc::new(SerialPipeline::new(name, stages)?)
            }
            PipelineType::Parallel => {
                let kind = config
                    .combiner_kind()?
                    .ok_or_else(|| PipelineError::InvalidConfig(format!("'{}' has no combiner", name)))?;
                let combiner = self.combiner(config, &base, kind)?;
                Arc::new(ParallelPipeline::new(name, resolve_all(&providers[..])?, combiner)?)
            }
            PipelineType::Nested => {
                let stages = config
                    .stages
                    .iter()
                    .map(|stage| self.build(stage, &base, &options))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(SerialPipeline::nested(name, stages)?)
            }
            PipelineType::Transform => match config.stages.first() {
                Some(stage) => self.build(stage, &base, &options)?,
                None => Arc::new(SimplePipeline::named(name, resolve(providers[0])?)),
            },
            PipelineType::HighAvailability => {
                let primary = SimplePipeline::named(name, resolve(providers[0])?);
                let fallbacks = resolve_all(&providers[1..])?
                    .into_iter()
                    .map(PipelineOption::Fallback)
                    .collect::<Vec<_>>();
                let primary_options = primary.options().apply(&fallbacks);
                Arc::new(primary.with_pipeline_options(primary_options))
            }
            PipelineType::Consensus => {
                let combiner = self.combiner(config, &base, CombinerKind::Consensus)?;
                Arc::new(ParallelPipeline::new(name, resolve_all(&providers[..])?, combiner)?)
            }
            PipelineType::Collaborative => Arc::new(CollaborativePipeline::new(
                name,
                resolve_all(&providers[..])?,
                config.rounds()?,
            )?),
            PipelineType::Balanced => {
                let instances = (0..config.instances()?)
                    .map(|i| {
                        resolve(providers[0]).map(|p| {
                            Arc::new(SimplePipeline::named(format!("{}#{}", providers[0], i), p))
                                as SharedPipeline
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(BalancedPipeline::new(name, instances, config.strategy()?)?)
            }
        };
        let pipeline = if composite {
            pipeline
        } else {
            with_options(&options, pipeline)
        };

        self.wrap_transforms(config, pipeline)
    }

    fn provider(
        &self,
        config: &PipelineConfig,
        base: &ProviderConfig,
        name: &str,
    ) -> Result<Arc<dyn Provider>> {
        let mut resolved = self.factory.config_for(name, Some(base));
        if let Some(specific) = config.provider_configs.get(name) {
            resolved = resolved.overlay(specific);
        }
        self.factory
            .registry()
            .create(name, &resolved)
            .map_err(|e| e.wrap("resolve_provider", config.name.clone()))
    }

    fn combiner(
        &self,
        config: &PipelineConfig,
        base: &ProviderConfig,
        kind: CombinerKind,
    ) -> Result<Arc<dyn ResultCombiner>> {
        let judge = || -> Result<Arc<dyn Provider>> {
            let name = config.combiner_str("judge_provider").ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "combiner '{}' in '{}' needs a judge_provider",
                    kind, config.name
                ))
            })?;
            self.provider(config, base, name)
        };

        Ok(match kind {
            CombinerKind::Concat => Arc::new(match config.combiner_str("separator") {
                Some(sep) => ConcatCombiner::new(sep),
                None => ConcatCombiner::default(),
            }),
            CombinerKind::MajorityVote => Arc::new(MajorityVoteCombiner::new()),
            CombinerKind::Longest => Arc::new(LongestResponseCombiner::new()),
            CombinerKind::QualityScore => Arc::new(
                match config.combiner_config.get("base_tokens").and_then(Value::as_u64) {
                    Some(n) => QualityScoreCombiner::new(n as usize),
                    None => QualityScoreCombiner::default(),
                },
            ),
            CombinerKind::BestPicker => Arc::new(BestPickerCombiner::new(judge()?)),
            CombinerKind::Consensus => Arc::new(ConsensusCombiner::new(judge()?)),
            CombinerKind::Jury => {
                let jurors = config
                    .combiner_names("jurors")?
                    .iter()
                    .map(|n| self.provider(config, base, n))
                    .collect::<Result<Vec<_>>>()?;
                let method = config
                    .combiner_str("voting_method")
                    .map(str::parse::<VotingMethod>)
                    .transpose()?
                    .unwrap_or_default();
                let mut jury = JuryCombiner::new(jurors, method)?;
                if let Some(weights) = config.combiner_config.get("weights") {
                    let weights: Vec<f64> = serde_json::from_value(weights.clone()).map_err(|_| {
                        PipelineError::InvalidConfig(format!(
                            "combiner_config.weights in '{}' must be a list of numbers",
                            config.name
                        ))
                    })?;
                    jury = jury.with_weights(weights)?;
                }
                Arc::new(jury)
            }
            CombinerKind::RoundRobin => Arc::new(RoundRobinCombiner::new()),
        })
    }

    fn options(&self, config: &PipelineConfig, base: &ProviderConfig) -> Result<Vec<PipelineOption>> {
        let mut options = Vec::new();
        if let Some(n) = config.option_u64("max_retries")? {
            options.push(PipelineOption::MaxRetries(n as u32));
        }
        for name in config.option_names("fallbacks")? {
            options.push(PipelineOption::Fallback(self.provider(config, base, &name)?));
        }
        let ttl = config.option_u64("cache_ttl_secs")?.map(Duration::from_secs);
        match config.options.get("cache").and_then(Value::as_bool) {
            Some(true) => options.push(PipelineOption::Cache(ttl.unwrap_or(DEFAULT_CACHE_TTL))),
            Some(false) => options.push(PipelineOption::NoCache),
            None => {
                if let Some(ttl) = ttl {
                    options.push(PipelineOption::Cache(ttl));
                }
            }
        }
        Ok(options)
    }

    fn wrap_transforms(&self, config: &PipelineConfig, inner: SharedPipeline) -> Result<SharedPipeline> {
        if config.input_transform.is_none() && config.output_transform.is_none() {
            return Ok(inner);
        }
        let mut adapter = TransformAdapter::new(config.name.clone(), inner);
        if let Some(name) = &config.input_transform {
            adapter = adapter.with_input_fn(name.clone(), self.transforms.get(name)?);
        }
        if let Some(name) = &config.output_transform {
            adapter = adapter.with_output_fn(name.clone(), self.transforms.get(name)?);
        }
        Ok(Arc::new(adapter))
    }
}

fn with_options(options: &[PipelineOption], pipeline: SharedPipeline) -> SharedPipeline {
    if options.is_empty() {
        pipeline
    } else {
        pipeline.with_options(options)
    }
}
