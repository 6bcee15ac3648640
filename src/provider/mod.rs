//! Provider trait and per-provider configuration.
//!
//! The [`Provider`] trait is the only boundary between this crate and an AI
//! back-end. Implementations own their wire format, authentication, and HTTP
//! client; pipelines only ever see [`Request`] and [`Response`].
//!
//! ```text
//! Pipeline ──► Request ──► Provider::generate_response() ──► Response
//!                                   │
//!                       ┌───────────┴───────────┐
//!                 vendor adapters          MockProvider
//!                 (out of crate)           (tests, demos)
//! ```

pub mod mock;
pub mod registry;

pub use mock::{MockProvider, MockReply};
pub use registry::{ProviderFactoryFn, ProviderRegistry};

use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::{Request, Response, ResponseChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Callback receiving streamed chunks. Returning an error aborts the stream.
pub type StreamHandler<'a> = &'a mut (dyn FnMut(ResponseChunk) -> Result<()> + Send);

/// Abstraction over one AI back-end.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Execute a non-streaming call.
    async fn generate_response(&self, ctx: &ExecCtx, request: &Request) -> Result<Response>;

    /// Execute a streaming call.
    ///
    /// `handler` is invoked for each chunk and must receive exactly one
    /// terminal chunk with `is_final = true`.
    async fn generate_streaming_response(
        &self,
        ctx: &ExecCtx,
        request: &Request,
        handler: StreamHandler<'_>,
    ) -> Result<()>;

    /// Registry name of this provider (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Capability tags (e.g. `"streaming"`, `"function_calling"`).
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Settings used when a registry factory builds a provider.
///
/// Every field is optional so configs can be layered with [`overlay`](Self::overlay).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Provider-specific extras, merged key by key.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl ProviderConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Layer `other` on top of `self`: fields set in `other` win.
    pub fn overlay(&self, other: &ProviderConfig) -> ProviderConfig {
        let mut options = self.options.clone();
        for (k, v) in &other.options {
            options.insert(k.clone(), v.clone());
        }
        ProviderConfig {
            model: other.model.clone().or_else(|| self.model.clone()),
            base_url: other.base_url.clone().or_else(|| self.base_url.clone()),
            api_key: other.api_key.clone().or_else(|| self.api_key.clone()),
            temperature: other.temperature.or(self.temperature),
            max_tokens: other.max_tokens.or(self.max_tokens),
            options,
        }
    }
}
