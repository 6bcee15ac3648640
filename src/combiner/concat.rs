use super::{
    ensure_nonempty, in_submission_order, provider_names, total_usage, ResultCombiner,
    COMBINER_KEY,
};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::Response;
use async_trait::async_trait;
use serde_json::json;

/// Joins every response's content with a separator, in submission order.
#[derive(Debug, Clone)]
pub struct ConcatCombiner {
    separator: String,
}

impl ConcatCombiner {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }
}

impl Default for ConcatCombiner {
    fn default() -> Self {
        Self::new("\n\n")
    }
}

#[async_trait]
impl ResultCombiner for ConcatCombiner {
    fn name(&self) -> &'static str {
        "concat"
    }

    async fn combine(&self, _ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);

        let content = responses
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator);
        let providers = provider_names(&responses);

        Ok(Response::new(content, providers.join(","), "")
            .with_usage(total_usage(&responses))
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("providers", json!(providers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::parallel::BRANCH_INDEX_KEY;

    fn indexed(content: &str, provider: &str, index: u64) -> Response {
        Response::new(content, provider, "m").with_metadata(BRANCH_INDEX_KEY, json!(index))
    }

    #[tokio::test]
    async fn test_concat_restores_submission_order() {
        let c = ConcatCombiner::new(" | ");
        let out = c
            .combine(
                &ExecCtx::new(),
                vec![indexed("r2", "b", 1), indexed("r1", "a", 0)],
            )
            .await
            .unwrap();
        assert_eq!(out.content, "r1 | r2");
        assert_eq!(out.provider, "a,b");
        assert_eq!(out.metadata[COMBINER_KEY], json!("concat"));
    }

    #[tokio::test]
    async fn test_concat_without_indices_keeps_slice_order() {
        let c = ConcatCombiner::default();
        let out = c
            .combine(
                &ExecCtx::new(),
                vec![Response::new("x", "a", "m"), Response::new("y", "b", "m")],
            )
            .await
            .unwrap();
        assert_eq!(out.content, "x\n\ny");
    }

    #[tokio::test]
    async fn test_concat_empty_rejected() {
        let err = ConcatCombiner::default()
            .combine(&ExecCtx::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoResponses));
    }
}
