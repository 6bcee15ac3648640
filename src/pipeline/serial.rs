//! Ordered stage composition.
//!
//! [`SerialPipeline`] runs its stages one after another, feeding each
//! stage's output text in as the next stage's prompt. The rest of the
//! request (temperature, parameters, functions) is carried through
//! unchanged. Any stage error ends the run.

use super::{instrumented, BoxFut, Pipeline, SharedPipeline};
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::options::PipelineOption;
use crate::types::{Request, Response, Usage};
use serde_json::json;
use std::sync::Arc;

/// A sequence of pipelines executed in order.
///
/// Stages can be any [`Pipeline`], including other serial pipelines, so
/// the same type serves both the flat `serial` shape over providers and the
/// `nested` shape over arbitrary sub-pipelines. The two differ only in
/// [`Pipeline::kind`].
#[derive(Clone)]
pub struct SerialPipeline {
    name: String,
    kind: &'static str,
    stages: Vec<SharedPipeline>,
}

impl SerialPipeline {
    /// Fails if `stages` is empty.
    pub fn new(name: impl Into<String>, stages: Vec<SharedPipeline>) -> Result<Self> {
        Self::with_kind(name.into(), "serial", stages)
    }

    /// A serial pipeline reported as kind `"nested"`.
    pub fn nested(name: impl Into<String>, stages: Vec<SharedPipeline>) -> Result<Self> {
        Self::with_kind(name.into(), "nested", stages)
    }

    fn with_kind(name: String, kind: &'static str, stages: Vec<SharedPipeline>) -> Result<Self> {
        if stages.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} pipeline '{}' has no stages",
                kind, name
            )));
        }
        Ok(Self { name, kind, stages })
    }

    pub fn stages(&self) -> &[SharedPipeline] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage and return each stage's response in order.
    pub async fn execute_all(&self, ctx: &ExecCtx, request: Request) -> Result<Vec<Response>> {
        let mut outputs: Vec<Response> = Vec::with_capacity(self.stages.len());
        let mut current = request;

        for (i, stage) in self.stages.iter().enumerate() {
            ctx.check_cancelled()?;
            let next = match outputs.last() {
                Some(prev) => current.with_prompt(prev.content.clone()),
                None => current,
            };
            let response = stage
                .execute_with_request(ctx, next.clone())
                .await
                .map_err(|e| {
                    e.wrap(
                        "stage",
                        format!("{} [{}/{}: {}]", self.name, i + 1, self.stages.len(), stage.name()),
                    )
                })?;
            current = next;
            outputs.push(response);
        }

        Ok(outputs)
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        let outputs = self.execute_all(ctx, request).await?;
        let usage: Usage = outputs.iter().map(|r| r.usage).sum();
        let trail: Vec<&str> = outputs.iter().map(|r| r.provider.as_str()).collect();
        let trail = json!(trail);
        outputs
            .into_iter()
            .last()
            .map(|last| last.with_usage(usage).with_metadata("stages", trail))
            .ok_or_else(|| PipelineError::Other(format!("'{}' produced no output", self.name)))
    }
}

impl Pipeline for SerialPipeline {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, self.kind, self.run(ctx, request)))
    }

    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline {
        Arc::new(Self {
            name: self.name.clone(),
            kind: self.kind,
            stages: self.stages.iter().map(|s| s.with_options(options)).collect(),
        })
    }
}

impl std::fmt::Debug for SerialPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPipeline")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
