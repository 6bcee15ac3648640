//! Declarative pipeline descriptions.
//!
//! A [`PipelineConfig`] names a pipeline shape, the providers it uses, and
//! shape-specific settings. Stage configs are full configs themselves, so
//! nesting is unbounded. [`factory::ConfigFactory`] turns a validated config
//! into a live pipeline; [`store`] persists named configs.
//!
//! ```json
//! {
//!   "name": "vote",
//!   "type": "parallel",
//!   "providers": ["a", "b", "c"],
//!   "combiner": "jury",
//!   "combiner_config": { "jurors": ["judge"], "voting_method": "majority" },
//!   "options": { "max_retries": 2 }
//! }
//! ```

pub mod factory;
pub mod store;

pub use factory::{ConfigFactory, TransformRegistry};
pub use store::{ConfigStore, DirConfigStore, MemoryConfigStore};

use crate::combiner::{CombinerKind, VotingMethod};
use crate::error::{PipelineError, Result};
use crate::pipeline::BalanceStrategy;
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Default number of rounds for `collaborative` configs.
pub const DEFAULT_ROUNDS: usize = 2;
/// Default instance count for `balanced` configs.
pub const DEFAULT_INSTANCES: usize = 2;

/// The pipeline shapes a config can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineType {
    #[default]
    Simple,
    Serial,
    Parallel,
    Nested,
    Transform,
    HighAvailability,
    Consensus,
    Collaborative,
    Balanced,
}

impl PipelineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::Simple => "simple",
            PipelineType::Serial => "serial",
            PipelineType::Parallel => "parallel",
            PipelineType::Nested => "nested",
            PipelineType::Transform => "transform",
            PipelineType::HighAvailability => "high-availability",
            PipelineType::Consensus => "consensus",
            PipelineType::Collaborative => "collaborative",
            PipelineType::Balanced => "balanced",
        }
    }

    /// Types that call several providers per request without a
    /// [`SimplePipeline`](crate::pipeline::SimplePipeline) around each call.
    pub fn fans_out(&self) -> bool {
        matches!(
            self,
            PipelineType::Parallel | PipelineType::Consensus | PipelineType::Collaborative
        )
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable description of a pipeline graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: PipelineType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,

    /// Single-provider shorthand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combiner: Option<String>,

    /// Keys: `separator`, `base_tokens`, `judge_provider`, `jurors`,
    /// `voting_method`, `weights`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub combiner_config: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<PipelineConfig>,

    /// Provider settings inherited by every provider in this config and
    /// its stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_config: Option<ProviderConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transform: Option<String>,

    /// Keys: `max_retries`, `cache`, `cache_ttl_secs`, `fallbacks`,
    /// `rounds`, `instances`, `strategy`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,

    /// Per-provider settings, layered over `base_config`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_configs: BTreeMap<String, ProviderConfig>,
}

fn invalid(config: &PipelineConfig, message: impl fmt::Display) -> PipelineError {
    PipelineError::InvalidConfig(format!(
        "{} pipeline '{}': {}",
        config.kind, config.name, message
    ))
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, kind: PipelineType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn with_providers<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.providers.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_combiner(mut self, combiner: CombinerKind) -> Self {
        self.combiner = Some(combiner.as_str().to_string());
        self
    }

    pub fn with_combiner_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.combiner_config.insert(key.into(), value);
        self
    }

    pub fn with_stage(mut self, stage: PipelineConfig) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_base_config(mut self, config: ProviderConfig) -> Self {
        self.base_config = Some(config);
        self
    }

    pub fn with_provider_config(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.provider_configs.insert(name.into(), config);
        self
    }

    pub fn with_input_transform(mut self, name: impl Into<String>) -> Self {
        self.input_transform = Some(name.into());
        self
    }

    pub fn with_output_transform(mut self, name: impl Into<String>) -> Self {
        self.output_transform = Some(name.into());
        self
    }

    /// `provider` followed by `providers`, in that order.
    pub fn all_providers(&self) -> Vec<&str> {
        self.provider
            .iter()
            .chain(self.providers.iter())
            .map(String::as_str)
            .collect()
    }

    /// Parse `combiner`, if set.
    pub fn combiner_kind(&self) -> Result<Option<CombinerKind>> {
        self.combiner.as_deref().map(str::parse::<CombinerKind>).transpose()
    }

    pub(crate) fn combiner_str(&self, key: &str) -> Option<&str> {
        self.combiner_config.get(key).and_then(Value::as_str)
    }

    pub(crate) fn combiner_names(&self, key: &str) -> Result<Vec<String>> {
        match self.combiner_config.get(key) {
            None => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| invalid(self, format!("combiner_config.{} must be a list of names", key))),
        }
    }

    pub(crate) fn option_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(self, format!("options.{} must be a non-negative integer", key))),
        }
    }

    pub(crate) fn option_names(&self, key: &str) -> Result<Vec<String>> {
        match self.options.get(key) {
            None => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| invalid(self, format!("options.{} must be a list of names", key))),
        }
    }

    pub(crate) fn rounds(&self) -> Result<usize> {
        Ok(self.option_u64("rounds")?.map_or(DEFAULT_ROUNDS, |n| n as usize))
    }

    pub(crate) fn instances(&self) -> Result<usize> {
        Ok(self
            .option_u64("instances")?
            .map_or(DEFAULT_INSTANCES, |n| n as usize))
    }

    pub(crate) fn strategy(&self) -> Result<BalanceStrategy> {
        match self.options.get("strategy") {
            None => Ok(BalanceStrategy::default()),
            Some(v) => v
                .as_str()
                .ok_or_else(|| invalid(self, "options.strategy must be a string"))?
                .parse(),
        }
    }

    /// Check the config and every stage beneath it.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "pipeline name must not be empty".into(),
            ));
        }
        let providers = self.all_providers();

        match self.kind {
            PipelineType::Simple => {
                if providers.len() != 1 {
                    return Err(invalid(self, "requires exactly one provider"));
                }
            }
            PipelineType::Serial => {
                if providers.is_empty() && self.stages.is_empty() {
                    return Err(invalid(self, "requires at least one provider or stage"));
                }
            }
            PipelineType::Parallel => {
                if providers.is_empty() {
                    return Err(invalid(self, "requires at least one provider"));
                }
                let kind = self
                    .combiner_kind()?
                    .ok_or_else(|| invalid(self, "requires a combiner"))?;
                self.validate_combiner(kind)?;
            }
            PipelineType::Nested => {
                if self.stages.is_empty() {
                    return Err(invalid(self, "requires at least one stage"));
                }
            }
            PipelineType::Transform => {
                if self.input_transform.is_none() && self.output_transform.is_none() {
                    return Err(invalid(self, "requires an input or output transform"));
                }
                match (self.stages.len(), providers.len()) {
                    (1, 0) | (0, 1) => {}
                    _ => {
                        return Err(invalid(
                            self,
                            "requires either exactly one stage or exactly one provider",
                        ))
                    }
                }
            }
            PipelineType::HighAvailability => {
                if providers.len() < 2 {
                    return Err(invalid(
                        self,
                        "requires a primary and at least one fallback provider",
                    ));
                }
            }
            PipelineType::Consensus => {
                if providers.len() < 2 {
                    return Err(invalid(self, "requires at least two providers"));
                }
                if self.combiner_str("judge_provider").is_none() {
                    return Err(invalid(self, "requires combiner_config.judge_provider"));
                }
            }
            PipelineType::Collaborative => {
                if providers.is_empty() {
                    return Err(invalid(self, "requires at least one provider"));
                }
                if self.rounds()? == 0 {
                    return Err(invalid(self, "options.rounds must be at least 1"));
                }
            }
            PipelineType::Balanced => {
                if providers.len() != 1 {
                    return Err(invalid(self, "requires exactly one provider"));
                }
                if self.instances()? == 0 {
                    return Err(invalid(self, "options.instances must be at least 1"));
                }
                self.strategy()?;
            }
        }

        self.option_u64("max_retries")?;
        self.option_u64("cache_ttl_secs")?;
        self.option_names("fallbacks")?;
        if let Some(cache) = self.options.get("cache") {
            if !cache.is_boolean() {
                return Err(invalid(self, "options.cache must be a boolean"));
            }
        }
        let caches = self.options.contains_key("cache") || self.options.contains_key("cache_ttl_secs");
        if caches && self.kind.fans_out() {
            return Err(invalid(
                self,
                "caching applies to single-provider pipelines only; set it on a simple stage",
            ));
        }

        self.stages.iter().try_for_each(PipelineConfig::validate)
    }

    fn validate_combiner(&self, kind: CombinerKind) -> Result<()> {
        if kind.needs_judge() && self.combiner_str("judge_provider").is_none() {
            return Err(invalid(
                self,
                format!("combiner '{}' requires combiner_config.judge_provider", kind),
            ));
        }
        if kind == CombinerKind::Jury {
            if self.combiner_names("jurors")?.is_empty() {
                return Err(invalid(self, "combiner 'jury' requires combiner_config.jurors"));
            }
            if let Some(method) = self.combiner_str("voting_method") {
                method.parse::<VotingMethod>()?;
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse without validating; call [`validate`](Self::validate) before use.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[cfg(feature = "yaml")]
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn consensus(providers: &[&str]) -> PipelineConfig {
        PipelineConfig::new("agree", PipelineType::Consensus)
            .with_providers(providers.iter().copied())
            .with_combiner_option("judge_provider", json!("judge"))
    }

    #[test]
    fn test_consensus_validation() {
        assert!(consensus(&["a", "b"]).validate().is_ok());
        assert!(consensus(&["a"]).validate().is_err());

        let mut no_judge = consensus(&["a", "b"]);
        no_judge.combiner_config.clear();
        let err = no_judge.validate().unwrap_err();
        assert!(err.to_string().contains("judge_provider"));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::new("outer", PipelineType::Nested)
            .with_stage(
                PipelineConfig::new("fan", PipelineType::Parallel)
                    .with_providers(["a", "b"])
                    .with_combiner(CombinerKind::Concat)
                    .with_combiner_option("separator", json!(" | ")),
            )
            .with_stage(
                PipelineConfig::new("polish", PipelineType::Transform)
                    .with_provider("c")
                    .with_output_transform("trim"),
            )
            .with_base_config(ProviderConfig::default().with_temperature(0.3))
            .with_provider_config("c", ProviderConfig::default().with_model("big"))
            .with_option("max_retries", json!(3));

        let json = config.to_json().unwrap();
        let parsed = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_type_names() {
        let config: PipelineConfig =
            serde_json::from_value(json!({"name": "ha", "type": "high-availability"})).unwrap();
        assert_eq!(config.kind, PipelineType::HighAvailability);
        assert_eq!(
            serde_json::to_value(PipelineType::Collaborative).unwrap(),
            json!("collaborative")
        );
        assert!(serde_json::from_value::<PipelineConfig>(json!({"name": "x", "type": "mystery"})).is_err());
    }

    #[test]
    fn test_per_type_rules() {
        let simple = PipelineConfig::new("s", PipelineType::Simple);
        assert!(simple.validate().is_err());
        assert!(simple.clone().with_provider("a").validate().is_ok());

        let parallel = PipelineConfig::new("p", PipelineType::Parallel).with_providers(["a"]);
        assert!(parallel.validate().is_err());
        assert!(parallel
            .clone()
            .with_combiner(CombinerKind::BestPicker)
            .validate()
            .is_err());
        assert!(parallel
            .clone()
            .with_combiner(CombinerKind::Jury)
            .with_combiner_option("jurors", json!(["j"]))
            .with_combiner_option("voting_method", json!("weighted"))
            .validate()
            .is_ok());

        let ha = PipelineConfig::new("ha", PipelineType::HighAvailability).with_provider("a");
        assert!(ha.validate().is_err());
        assert!(ha.with_providers(["b"]).validate().is_ok());

        let transform = PipelineConfig::new("t", PipelineType::Transform).with_provider("a");
        assert!(transform.validate().is_err());
        assert!(transform.with_input_transform("trim").validate().is_ok());
    }

    #[test]
    fn test_transform_wraps_exactly_one_target() {
        let stage = |name: &str| PipelineConfig::new(name, PipelineType::Simple).with_provider("a");
        let transform =
            || PipelineConfig::new("t", PipelineType::Transform).with_output_transform("trim");

        assert!(transform().with_stage(stage("s1")).validate().is_ok());

        let two_stages = transform().with_stage(stage("s1")).with_stage(stage("s2"));
        assert!(matches!(two_stages.validate(), Err(PipelineError::InvalidConfig(_))));

        let stage_and_provider = transform().with_provider("b").with_stage(stage("s1"));
        assert!(matches!(stage_and_provider.validate(), Err(PipelineError::InvalidConfig(_))));

        let two_providers = transform().with_providers(["a", "b"]);
        assert!(matches!(two_providers.validate(), Err(PipelineError::InvalidConfig(_))));

        assert!(transform().validate().is_err());
    }

    #[test]
    fn test_cache_rejected_on_fan_out_types() {
        let parallel = PipelineConfig::new("p", PipelineType::Parallel)
            .with_providers(["a", "b"])
            .with_combiner(CombinerKind::Concat);
        assert!(parallel.validate().is_ok());
        assert!(parallel.clone().with_option("cache", json!(true)).validate().is_err());
        assert!(parallel.with_option("cache_ttl_secs", json!(30)).validate().is_err());

        let talk = PipelineConfig::new("c", PipelineType::Collaborative)
            .with_providers(["a", "b"])
            .with_option("cache", json!(true));
        assert!(talk.validate().is_err());
        assert!(consensus(&["a", "b"]).with_option("cache", json!(false)).validate().is_err());

        let simple = PipelineConfig::new("s", PipelineType::Simple)
            .with_provider("a")
            .with_option("cache", json!(true));
        assert!(simple.validate().is_ok());
    }

    #[test]
    fn test_nested_validates_stages() {
        let bad_stage = PipelineConfig::new("inner", PipelineType::Simple);
        let nested = PipelineConfig::new("outer", PipelineType::Nested).with_stage(bad_stage);
        let err = nested.validate().unwrap_err();
        assert!(err.to_string().contains("'inner'"));
    }

    #[test]
    fn test_option_types_checked() {
        let config = PipelineConfig::new("s", PipelineType::Simple)
            .with_provider("a")
            .with_option("max_retries", json!("three"));
        assert!(config.validate().is_err());

        let balanced = PipelineConfig::new("b", PipelineType::Balanced)
            .with_provider("a")
            .with_option("strategy", json!("sideways"));
        assert!(balanced.validate().is_err());
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_yaml_round_trip() {
        let config = consensus(&["a", "b"]);
        let yaml = config.to_yaml().unwrap();
        assert_eq!(PipelineConfig::from_yaml(&yaml).unwrap(), config);
    }
}
