//! Mock provider for testing without a live back-end.
//!
//! [`MockProvider`] plays back a script of [`MockReply`] values in order,
//! allowing deterministic tests of retry, fallback, and fan-out behavior.
//!
//! # Example
//!
//! ```
//! use llm_ensemble::provider::{MockProvider, MockReply};
//!
//! let flaky = MockProvider::new(
//!     "flaky",
//!     vec![MockReply::RateLimited, MockReply::Text("ok".into())],
//! );
//! assert_eq!(flaky.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Provider, StreamHandler};
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::types::{Request, Response, ResponseChunk, Usage};

/// Computes response text from the incoming request.
pub type Responder = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// One scripted outcome of a [`MockProvider`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Succeed with this text.
    Text(String),
    /// Succeed with the responder's output, or the prompt itself if none is set.
    Echo,
    /// Fail with [`PipelineError::RateLimited`].
    RateLimited,
    /// Fail with [`PipelineError::DeadlineExceeded`].
    Timeout,
    /// Fail with a permanent [`PipelineError::Provider`] error.
    Fail(String),
}

/// A test provider that replays scripted replies.
///
/// Cycles back to the beginning when the script has been consumed.
/// Streaming emits the text word by word followed by one final chunk.
pub struct MockProvider {
    name: String,
    model: String,
    replies: Vec<MockReply>,
    index: AtomicUsize,
    calls: AtomicUsize,
    delay: Option<Duration>,
    responder: Option<Responder>,
    capabilities: Vec<String>,
}

impl MockProvider {
    /// Create a mock with the given reply script. An empty script echoes.
    pub fn new(name: impl Into<String>, mut replies: Vec<MockReply>) -> Self {
        if replies.is_empty() {
            replies.push(MockReply::Echo);
        }
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            replies,
            index: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            delay: None,
            responder: None,
            capabilities: vec!["streaming".to_string()],
        }
    }

    /// A mock that always returns the same text.
    pub fn fixed(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, vec![MockReply::Text(text.into())])
    }

    /// A mock that always fails with a permanent error.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, vec![MockReply::Fail(message.into())])
    }

    /// A mock whose text is computed from each request.
    pub fn responder(
        name: impl Into<String>,
        f: impl Fn(&Request) -> String + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, vec![MockReply::Echo]).with_responder(f)
    }

    pub fn with_responder(mut self, f: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        self.responder = Some(Arc::new(f));
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of calls made so far (streaming included).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> MockReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = self.index.fetch_add(1, Ordering::SeqCst) % self.replies.len();
        self.replies[idx].clone()
    }

    async fn produce(&self, request: &Request) -> Result<String> {
        let reply = self.next_reply();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Echo => Ok(match &self.responder {
                Some(f) => f(request),
                None => request.prompt.clone(),
            }),
            MockReply::RateLimited => Err(PipelineError::RateLimited {
                provider: self.name.clone(),
                message: "mock rate limit".to_string(),
            }),
            MockReply::Timeout => Err(PipelineError::DeadlineExceeded),
            MockReply::Fail(message) => Err(PipelineError::Provider {
                provider: self.name.clone(),
                message,
            }),
        }
    }
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate_response(&self, _ctx: &ExecCtx, request: &Request) -> Result<Response> {
        let text = self.produce(request).await?;
        let usage = Usage {
            prompt_tokens: word_count(&request.prompt),
            completion_tokens: word_count(&text),
            total_tokens: word_count(&request.prompt) + word_count(&text),
        };
        Ok(Response::new(text, self.name.clone(), self.model.clone()).with_usage(usage))
    }

    async fn generate_streaming_response(
        &self,
        ctx: &ExecCtx,
        request: &Request,
        handler: StreamHandler<'_>,
    ) -> Result<()> {
        let text = match self.produce(request).await {
            Ok(text) => text,
            Err(e) => {
                handler(ResponseChunk::error(e.to_string()))?;
                return Err(e);
            }
        };
        for piece in text.split_inclusive(' ') {
            ctx.check_cancelled()?;
            handler(ResponseChunk::content(piece))?;
        }
        handler(ResponseChunk::final_chunk())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("replies", &self.replies)
            .field("calls", &self.calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fixed_response() {
        let mock = MockProvider::fixed("m", "Hello!");
        let resp = mock
            .generate_response(&ExecCtx::new(), &Request::new("hi there"))
            .await
            .unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.provider, "m");
        assert_eq!(resp.usage.prompt_tokens, 2);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_cycles_replies() {
        let mock = MockProvider::new(
            "m",
            vec![MockReply::Text("first".into()), MockReply::RateLimited],
        );
        let ctx = ExecCtx::new();
        let req = Request::new("x");
        assert_eq!(mock.generate_response(&ctx, &req).await.unwrap().content, "first");
        assert!(mock.generate_response(&ctx, &req).await.unwrap_err().is_transient());
        assert_eq!(mock.generate_response(&ctx, &req).await.unwrap().content, "first");
    }

    #[tokio::test]
    async fn test_mock_responder() {
        let mock = MockProvider::responder("m", |r| format!("{}!", r.prompt));
        let resp = mock
            .generate_response(&ExecCtx::new(), &Request::new("hey"))
            .await
            .unwrap();
        assert_eq!(resp.content, "hey!");
    }

    #[tokio::test]
    async fn test_mock_streaming_chunks_and_final() {
        let mock = MockProvider::fixed("m", "one two three");
        let mut chunks = Vec::new();
        mock.generate_streaming_response(&ExecCtx::new(), &Request::new("x"), &mut |c| {
            chunks.push(c);
            Ok(())
        })
        .await
        .unwrap();
        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "one two three");
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
        assert!(chunks.last().unwrap().is_final);
    }

    #[tokio::test]
    async fn test_mock_streaming_handler_abort() {
        let mock = MockProvider::fixed("m", "a b c");
        let mut seen = 0;
        let res = mock
            .generate_streaming_response(&ExecCtx::new(), &Request::new("x"), &mut |_| {
                seen += 1;
                Err(PipelineError::Stream("stop".into()))
            })
            .await;
        assert!(res.is_err());
        assert_eq!(seen, 1);
    }
}
