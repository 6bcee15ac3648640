use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes a function call requested by a model and returns its result.
pub type FunctionExecutor = Arc<dyn Fn(&FunctionCall) -> anyhow::Result<Value> + Send + Sync>;

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default)]
    pub parameters: Value,
}

/// A function call emitted by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON object.
    #[serde(default)]
    pub arguments: Value,
}

/// A provider-agnostic request.
#[derive(Clone, Default)]
pub struct Request {
    /// The prompt text.
    pub prompt: String,

    /// Sampling temperature. `None` leaves the provider default.
    pub temperature: Option<f64>,

    /// Maximum tokens to generate. `None` leaves the provider default.
    pub max_tokens: Option<u32>,

    /// Arbitrary provider parameters.
    pub parameters: HashMap<String, Value>,

    /// Functions exposed to the model.
    pub functions: Vec<FunctionDefinition>,

    /// Executor invoked when the model answers with a function call.
    pub function_executor: Option<FunctionExecutor>,
}

impl Request {
    /// A request carrying only `prompt`; every other setting is unset.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_function(mut self, function: FunctionDefinition) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_function_executor(
        mut self,
        f: impl Fn(&FunctionCall) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.function_executor = Some(Arc::new(f));
        self
    }

    /// Same request settings with a different prompt.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("prompt", &self.prompt)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("parameters", &self.parameters)
            .field(
                "functions",
                &self.functions.iter().map(|f| &f.name).collect::<Vec<_>>(),
            )
            .field("has_function_executor", &self.function_executor.is_some())
            .finish()
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Field-wise sum, saturating at `u32::MAX`.
impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), |acc, u| acc + u)
    }
}

/// A provider-agnostic response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Generated text.
    pub content: String,

    /// Name of the provider (or combiner) that produced this response.
    pub provider: String,

    /// Model identifier.
    pub model: String,

    #[serde(default)]
    pub usage: Usage,

    /// Function call requested by the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Free-form annotations. Combiners record scores and votes here.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Response {
    /// A response with no usage, function call, or metadata.
    pub fn new(
        content: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_function_call(mut self, call: FunctionCall) -> Self {
        self.function_call = Some(call);
        self
    }
}

/// One unit of a streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseChunk {
    /// Content fragment (empty on a bare terminal chunk).
    pub content: String,
    /// Set on the one terminal chunk of a stream.
    pub is_final: bool,
    /// Error text if the stream ended abnormally.
    pub error: Option<String>,
}

impl ResponseChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn final_chunk() -> Self {
        Self {
            is_final: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_final: true,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let req = Request::new("hi")
            .with_temperature(0.2)
            .with_max_tokens(64)
            .with_parameter("top_p", json!(0.9));
        assert_eq!(req.prompt, "hi");
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(64));
        assert_eq!(req.parameters["top_p"], json!(0.9));
    }

    #[test]
    fn test_with_prompt_keeps_settings() {
        let req = Request::new("first").with_temperature(0.1);
        let next = req.with_prompt("second");
        assert_eq!(next.prompt, "second");
        assert_eq!(next.temperature, Some(0.1));
        assert_eq!(req.prompt, "first");
    }

    #[test]
    fn test_usage_sum() {
        let total: Usage = vec![
            Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            },
            Usage {
                prompt_tokens: 4,
                completion_tokens: 5,
                total_tokens: 9,
            },
        ]
        .into_iter()
        .sum();
        assert_eq!(total.total_tokens, 12);
        assert_eq!(total.prompt_tokens, 5);
    }

    #[test]
    fn test_usage_sum_saturates() {
        let huge = Usage {
            prompt_tokens: u32::MAX - 1,
            completion_tokens: 1,
            total_tokens: u32::MAX,
        };
        let total = huge + huge;
        assert_eq!(total.prompt_tokens, u32::MAX);
        assert_eq!(total.completion_tokens, 2);
        assert_eq!(total.total_tokens, u32::MAX);
    }

    #[test]
    fn test_request_debug_hides_executor() {
        let req = Request::new("x").with_function_executor(|_| Ok(json!(null)));
        let dbg = format!("{:?}", req);
        assert!(dbg.contains("has_function_executor: true"));
    }
}
