//! Judge-mediated combiners: a separate provider reads every candidate.

use super::{
    ask_judge, ensure_nonempty, in_submission_order, provider_names, total_usage,
    ResultCombiner, COMBINER_KEY,
};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::prompt;
use crate::provider::Provider;
use crate::types::Response;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Find a `LABEL: N` line and return `N` if it lies in `1..=max`.
pub(crate) fn parse_labeled_number(text: &str, label: &str, max: usize) -> Option<usize> {
    text.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '#', ' ']);
        let head = line.get(..label.len())?;
        if !head.eq_ignore_ascii_case(label) {
            return None;
        }
        let rest = line[label.len()..].trim_start().strip_prefix(':')?.trim();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<usize>().ok().filter(|n| (1..=max).contains(n))
    })
}

/// Asks a judge to pick the best candidate and returns every candidate plus
/// the judge's evaluation, so the caller sees the full context of the choice.
pub struct BestPickerCombiner {
    judge: Arc<dyn Provider>,
}

impl BestPickerCombiner {
    pub fn new(judge: Arc<dyn Provider>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl ResultCombiner for BestPickerCombiner {
    fn name(&self) -> &'static str {
        "best_picker"
    }

    async fn combine(&self, ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);
        let verdict = ask_judge(
            self.name(),
            &self.judge,
            ctx,
            prompt::best_picker_prompt(&responses),
        )
        .await?;

        let content = format!(
            "{}\n\n{}",
            prompt::candidate_list(&responses),
            prompt::section("Evaluation", verdict.content.trim())
        );
        let mut out = Response::new(content, self.judge.name(), self.judge.model())
            .with_usage(total_usage(&responses) + verdict.usage)
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("judge", json!(self.judge.name()))
            .with_metadata("candidates", json!(provider_names(&responses)));
        if let Some(best) = parse_labeled_number(&verdict.content, "BEST", responses.len()) {
            out = out
                .with_metadata("selected", json!(best))
                .with_metadata("selected_provider", json!(responses[best - 1].provider));
        }
        Ok(out)
    }
}

/// Asks a judge to merge the candidates into one agreed answer.
///
/// A single candidate passes through without a judge call.
pub struct ConsensusCombiner {
    judge: Arc<dyn Provider>,
}

impl ConsensusCombiner {
    pub fn new(judge: Arc<dyn Provider>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl ResultCombiner for ConsensusCombiner {
    fn name(&self) -> &'static str {
        "consensus"
    }

    async fn combine(&self, ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);
        if responses.len() == 1 {
            return Ok(responses[0]
                .clone()
                .with_metadata(COMBINER_KEY, json!(self.name()))
                .with_metadata("consensus_of", json!(1)));
        }

        let verdict = ask_judge(
            self.name(),
            &self.judge,
            ctx,
            prompt::consensus_prompt(&responses),
        )
        .await?;

        Ok(Response::new(
            verdict.content.trim(),
            self.judge.name(),
            self.judge.model(),
        )
        .with_usage(total_usage(&responses) + verdict.usage)
        .with_metadata(COMBINER_KEY, json!(self.name()))
        .with_metadata("judge", json!(self.judge.name()))
        .with_metadata("consensus_of", json!(responses.len()))
        .with_metadata("sources", json!(provider_names(&responses))))
    }
}
