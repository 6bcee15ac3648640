//! Adapters that turn plain functions into pipelines, or wrap a pipeline
//! with text transforms on the way in and out.

use super::{instrumented, BoxFut, Pipeline, SharedPipeline};
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::options::PipelineOption;
use crate::types::{Request, Response};
use std::sync::Arc;

/// A text-to-text transform. Errors surface as [`PipelineError::Transform`].
pub type TransformFn = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

type RequestFn = Arc<dyn Fn(Request) -> anyhow::Result<Response> + Send + Sync>;

#[derive(Clone)]
enum AdapterFn {
    Text(TransformFn),
    Request(RequestFn),
}

fn transform_error(name: &str, e: anyhow::Error) -> PipelineError {
    PipelineError::Transform {
        name: name.to_string(),
        message: format!("{:#}", e),
    }
}

/// A pipeline backed by a local function instead of a provider.
///
/// # Example
///
/// ```
/// use llm_ensemble::pipeline::{FunctionAdapter, Pipeline};
/// use llm_ensemble::ExecCtx;
///
/// # tokio_test::block_on(async {
/// let shout = FunctionAdapter::text("shout", |s: &str| Ok(s.to_uppercase()));
/// assert_eq!(shout.execute(&ExecCtx::new(), "hey").await.unwrap(), "HEY");
/// # });
/// ```
#[derive(Clone)]
pub struct FunctionAdapter {
    name: String,
    func: AdapterFn,
}

impl FunctionAdapter {
    /// Wrap a text-to-text function. The response reports the adapter's
    /// name as its provider.
    pub fn text(
        name: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: AdapterFn::Text(Arc::new(f)),
        }
    }

    /// Wrap a full request-to-response function.
    pub fn request(
        name: impl Into<String>,
        f: impl Fn(Request) -> anyhow::Result<Response> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: AdapterFn::Request(Arc::new(f)),
        }
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        ctx.check_cancelled()?;
        let result = match &self.func {
            AdapterFn::Text(f) => {
                f(&request.prompt).map(|text| Response::new(text, self.name.clone(), "function"))
            }
            AdapterFn::Request(f) => f(request),
        };
        result.map_err(|e| transform_error(&self.name, e))
    }
}

impl Pipeline for FunctionAdapter {
    fn kind(&self) -> &'static str {
        "function"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, "function", self.run(ctx, request)))
    }

    fn with_options(&self, _options: &[PipelineOption]) -> SharedPipeline {
        Arc::new(self.clone())
    }
}

impl std::fmt::Debug for FunctionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self.func {
            AdapterFn::Text(_) => "text",
            AdapterFn::Request(_) => "request",
        };
        f.debug_struct("FunctionAdapter")
            .field("name", &self.name)
            .field("shape", &shape)
            .finish()
    }
}

/// Wraps another pipeline with optional input and output transforms.
///
/// The input transform rewrites the prompt before delegating; the output
/// transform rewrites the inner response's content afterwards. Everything
/// else on the response (provider, usage, metadata) passes through.
#[derive(Clone)]
pub struct TransformAdapter {
    name: String,
    inner: SharedPipeline,
    input: Option<(String, TransformFn)>,
    output: Option<(String, TransformFn)>,
}

impl TransformAdapter {
    pub fn new(name: impl Into<String>, inner: SharedPipeline) -> Self {
        Self {
            name: name.into(),
            inner,
            input: None,
            output: None,
        }
    }

    /// Set the input transform; `label` names it in errors.
    pub fn with_input(
        mut self,
        label: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.input = Some((label.into(), Arc::new(f)));
        self
    }

    pub fn with_output(
        mut self,
        label: impl Into<String>,
        f: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.output = Some((label.into(), Arc::new(f)));
        self
    }

    /// Same as [`with_input`](Self::with_input) for an already shared transform.
    pub fn with_input_fn(mut self, label: impl Into<String>, f: TransformFn) -> Self {
        self.input = Some((label.into(), f));
        self
    }

    pub fn with_output_fn(mut self, label: impl Into<String>, f: TransformFn) -> Self {
        self.output = Some((label.into(), f));
        self
    }

    pub fn inner(&self) -> &SharedPipeline {
        &self.inner
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        let request = match &self.input {
            Some((label, f)) => {
                let prompt = f(&request.prompt)
                    .map_err(|e| transform_error(label, e).wrap("input_transform", self.name.clone()))?;
                request.with_prompt(prompt)
            }
            None => request,
        };

        let mut response = self.inner.execute_with_request(ctx, request).await?;

        if let Some((label, f)) = &self.output {
            response.content = f(&response.content)
                .map_err(|e| transform_error(label, e).wrap("output_transform", self.name.clone()))?;
        }
        Ok(response)
    }
}

impl Pipeline for TransformAdapter {
    fn kind(&self) -> &'static str {
        "transform"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, "transform", self.run(ctx, request)))
    }

    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline {
        Arc::new(Self {
            inner: self.inner.with_options(options),
            ..self.clone()
        })
    }
}

impl std::fmt::Debug for TransformAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformAdapter")
            .field("name", &self.name)
            .field("inner", &self.inner.name())
            .field("input", &self.input.as_ref().map(|(l, _)| l))
            .field("output", &self.output.as_ref().map(|(l, _)| l))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SimplePipeline;
    use crate::provider::MockProvider;

    #[tokio::test]
    async fn test_text_adapter() {
        let f = FunctionAdapter::text("rev", |s: &str| Ok(s.chars().rev().collect()));
        let resp = f
            .execute_with_request(&ExecCtx::new(), Request::new("abc"))
            .await
            .unwrap();
        assert_eq!(resp.content, "cba");
        assert_eq!(resp.provider, "rev");
    }

    #[tokio::test]
    async fn test_request_adapter_sees_full_request() {
        let f = FunctionAdapter::request("temp", |req: Request| {
            Ok(Response::new(
                format!("{:?}", req.temperature),
                "temp",
                "function",
            ))
        });
        let resp = f
            .execute_with_request(&ExecCtx::new(), Request::new("x").with_temperature(0.5))
            .await
            .unwrap();
        assert_eq!(resp.content, "Some(0.5)");
    }

    #[tokio::test]
    async fn test_function_error_is_transform_error() {
        let f = FunctionAdapter::text("bad", |_: &str| anyhow::bail!("nope"));
        let err = f.execute(&ExecCtx::new(), "x").await.unwrap_err();
        assert!(matches!(err, PipelineError::Transform { ref name, .. } if name == "bad"));
    }

    #[tokio::test]
    async fn test_transform_wraps_inner() {
        let echo = Arc::new(MockProvider::responder("echo", |r| format!("  {}  ", r.prompt)));
        let t = TransformAdapter::new("t", Arc::new(SimplePipeline::new(echo)))
            .with_input("upper", |s: &str| Ok(s.to_uppercase()))
            .with_output("trim", |s: &str| Ok(s.trim().to_string()));
        let resp = t
            .execute_with_request(&ExecCtx::new(), Request::new("hello"))
            .await
            .unwrap();
        assert_eq!(resp.content, "HELLO");
        assert_eq!(resp.provider, "echo");
    }

    #[tokio::test]
    async fn test_input_transform_failure_skips_inner() {
        let inner = Arc::new(MockProvider::fixed("m", "unused"));
        let t = TransformAdapter::new("t", Arc::new(SimplePipeline::new(inner.clone())))
            .with_input("reject", |_: &str| anyhow::bail!("empty prompt"));
        let err = t.execute(&ExecCtx::new(), "").await.unwrap_err();
        assert!(matches!(
            err.root(),
            PipelineError::Transform { name, .. } if name == "reject"
        ));
        assert_eq!(inner.calls(), 0);
    }
}
