use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One failed branch of a parallel fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFailure {
    /// Name of the provider that failed.
    pub provider: String,
    /// Rendered error message.
    pub error: String,
}

impl std::fmt::Display for BranchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Errors produced by pipelines, combiners, and the configuration layer.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid configuration detected at build or validation time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The provider rejected the call because of rate limiting. Transient.
    #[error("Provider '{provider}' rate limited: {message}")]
    RateLimited { provider: String, message: String },

    /// The context deadline elapsed before the call finished. Transient.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The context was cancelled explicitly.
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// Permanent provider failure (auth, bad request, upstream error).
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// The provider does not support the requested capability.
    #[error("Provider '{provider}' does not support {capability}")]
    Unsupported { provider: String, capability: String },

    /// Every branch of a parallel fan-out failed.
    #[error("All {} providers failed in '{pipeline}': {}", .failures.len(), join_failures(.failures))]
    AllBranchesFailed {
        pipeline: String,
        failures: Vec<BranchFailure>,
    },

    /// A combiner was handed an empty response set.
    #[error("No responses to combine")]
    NoResponses,

    /// A combiner failed (judge call, malformed judge output, no votes).
    #[error("Combiner '{combiner}' failed: {message}")]
    Combiner {
        combiner: &'static str,
        message: String,
    },

    /// A user-supplied transform or function adapter failed.
    #[error("Transform '{name}' failed: {message}")]
    Transform { name: String, message: String },

    /// A stream handler aborted or the stream ended without a final chunk.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A named provider, transform, or stored config does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error annotated with the operation and the pipeline that raised it.
    #[error("{op} failed in pipeline '{pipeline}': {source}")]
    Wrapped {
        op: &'static str,
        pipeline: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// JSON (de)serialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failed.
    #[cfg(feature = "yaml")]
    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem failure in a config store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

fn join_failures(failures: &[BranchFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// Annotate this error with an operation name and pipeline identity.
    pub fn wrap(self, op: &'static str, pipeline: impl Into<String>) -> Self {
        PipelineError::Wrapped {
            op,
            pipeline: pipeline.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any [`PipelineError::Wrapped`] layers.
    pub fn root(&self) -> &PipelineError {
        let mut current = self;
        while let PipelineError::Wrapped { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether a retry might succeed: rate limits and deadline expiry only.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            PipelineError::RateLimited { .. } | PipelineError::DeadlineExceeded
        )
    }

    /// Whether the root cause is an explicit cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), PipelineError::Cancelled)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
