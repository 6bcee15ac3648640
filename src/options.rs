//! Retry, fallback, and cache settings shared by every pipeline.
//!
//! [`PipelineOptions`] is an immutable value. Changing options goes through
//! [`Pipeline::with_options`](crate::pipeline::Pipeline::with_options), which
//! applies an ordered list of [`PipelineOption`]s to a copy. Scalar settings
//! follow "later option wins"; fallbacks accumulate in order.

use crate::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Cache lifetime used when a config enables caching without a TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A single option change, applied in order.
#[derive(Clone)]
pub enum PipelineOption {
    /// Total attempts against the primary provider (1 = no retry).
    MaxRetries(u32),
    /// Append a fallback provider, tried once after the primary gives up.
    Fallback(Arc<dyn Provider>),
    /// Drop every configured fallback.
    ClearFallbacks,
    /// Cache successful responses for this long.
    Cache(Duration),
    /// Disable response caching.
    NoCache,
}

impl std::fmt::Debug for PipelineOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineOption::MaxRetries(n) => write!(f, "MaxRetries({})", n),
            PipelineOption::Fallback(p) => write!(f, "Fallback({})", p.name()),
            PipelineOption::ClearFallbacks => write!(f, "ClearFallbacks"),
            PipelineOption::Cache(ttl) => write!(f, "Cache({:?})", ttl),
            PipelineOption::NoCache => write!(f, "NoCache"),
        }
    }
}

/// Retry, fallback, and cache configuration.
///
/// # Example
///
/// ```
/// use llm_ensemble::options::PipelineOptions;
/// use std::time::Duration;
///
/// let opts = PipelineOptions::builder()
///     .max_retries(3)
///     .cache(Duration::from_secs(60))
///     .build();
/// assert_eq!(opts.max_retries, 3);
/// assert_eq!(opts.cache_ttl, Some(Duration::from_secs(60)));
/// ```
#[derive(Clone)]
pub struct PipelineOptions {
    /// Total attempts against the primary provider. Default: 1 (no retry).
    pub max_retries: u32,

    /// Fallback providers, tried in order after the primary is exhausted.
    pub fallbacks: Vec<Arc<dyn Provider>>,

    /// Response cache TTL. `None` disables caching.
    pub cache_ttl: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_retries: 1,
            fallbacks: Vec::new(),
            cache_ttl: None,
        }
    }
}

impl PipelineOptions {
    pub fn builder() -> PipelineOptionsBuilder {
        PipelineOptionsBuilder::default()
    }

    /// Return a copy with `options` applied in order.
    pub fn apply(&self, options: &[PipelineOption]) -> PipelineOptions {
        let mut next = self.clone();
        for option in options {
            match option {
                PipelineOption::MaxRetries(n) => next.max_retries = *n,
                PipelineOption::Fallback(p) => next.fallbacks.push(p.clone()),
                PipelineOption::ClearFallbacks => next.fallbacks.clear(),
                PipelineOption::Cache(ttl) => next.cache_ttl = Some(*ttl),
                PipelineOption::NoCache => next.cache_ttl = None,
            }
        }
        next
    }

    /// Number of primary attempts; never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("max_retries", &self.max_retries)
            .field(
                "fallbacks",
                &self.fallbacks.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

/// Collects [`PipelineOption`]s and applies them in insertion order.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptionsBuilder {
    options: Vec<PipelineOption>,
}

impl PipelineOptionsBuilder {
    pub fn max_retries(mut self, n: u32) -> Self {
        self.options.push(PipelineOption::MaxRetries(n));
        self
    }

    pub fn fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.options.push(PipelineOption::Fallback(provider));
        self
    }

    pub fn cache(mut self, ttl: Duration) -> Self {
        self.options.push(PipelineOption::Cache(ttl));
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.options.push(PipelineOption::NoCache);
        self
    }

    pub fn option(mut self, option: PipelineOption) -> Self {
        self.options.push(option);
        self
    }

    /// The collected options, for [`Pipeline::with_options`](crate::pipeline::Pipeline::with_options).
    pub fn into_options(self) -> Vec<PipelineOption> {
        self.options
    }

    pub fn build(self) -> PipelineOptions {
        PipelineOptions::default().apply(&self.options)
    }
}
