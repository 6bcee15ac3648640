//! Algorithms that reduce several concurrent responses to one.
//!
//! A [`ResultCombiner`] is handed the successful branches of a
//! [`ParallelPipeline`](crate::pipeline::ParallelPipeline) in completion
//! order. Each combiner first restores submission order from
//! [`BRANCH_INDEX_KEY`](crate::pipeline::parallel::BRANCH_INDEX_KEY), so
//! tie-breaks and candidate numbering follow the provider list rather than
//! arrival. Every combiner rejects an empty input with
//! [`PipelineError::NoResponses`].

pub mod concat;
pub mod judge;
pub mod jury;
pub mod quality;
pub mod round_robin;
pub mod vote;

pub use concat::ConcatCombiner;
pub use judge::{BestPickerCombiner, ConsensusCombiner};
pub use jury::{Ballot, JuryCombiner, VotingMethod};
pub use quality::QualityScoreCombiner;
pub use round_robin::RoundRobinCombiner;
pub use vote::{LongestResponseCombiner, MajorityVoteCombiner};

use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::pipeline::parallel::BRANCH_INDEX_KEY;
use crate::provider::Provider;
use crate::types::{Request, Response, Usage};
use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Metadata key naming the combiner that produced a response.
pub const COMBINER_KEY: &str = "combiner";

/// Reduces a non-empty set of responses to one.
#[async_trait]
pub trait ResultCombiner: Send + Sync {
    /// Stable identifier (e.g. `"majority_vote"`).
    fn name(&self) -> &'static str;

    /// Combine `responses` (never empty when called by a pipeline).
    async fn combine(&self, ctx: &ExecCtx, responses: Vec<Response>) -> Result<Response>;
}

/// The combiner names understood by the declarative config layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombinerKind {
    Concat,
    MajorityVote,
    Longest,
    QualityScore,
    BestPicker,
    Consensus,
    Jury,
    RoundRobin,
}

impl CombinerKind {
    pub const ALL: [CombinerKind; 8] = [
        CombinerKind::Concat,
        CombinerKind::MajorityVote,
        CombinerKind::Longest,
        CombinerKind::QualityScore,
        CombinerKind::BestPicker,
        CombinerKind::Consensus,
        CombinerKind::Jury,
        CombinerKind::RoundRobin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CombinerKind::Concat => "concat",
            CombinerKind::MajorityVote => "majority_vote",
            CombinerKind::Longest => "longest",
            CombinerKind::QualityScore => "quality_score",
            CombinerKind::BestPicker => "best_picker",
            CombinerKind::Consensus => "consensus",
            CombinerKind::Jury => "jury",
            CombinerKind::RoundRobin => "round_robin",
        }
    }

    /// Whether this combiner calls a judge provider.
    pub fn needs_judge(&self) -> bool {
        matches!(self, CombinerKind::BestPicker | CombinerKind::Consensus)
    }
}

impl FromStr for CombinerKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        CombinerKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("unknown combiner '{}'", s)))
    }
}

impl std::fmt::Display for CombinerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn ensure_nonempty(responses: &[Response]) -> Result<()> {
    if responses.is_empty() {
        return Err(PipelineError::NoResponses);
    }
    Ok(())
}

/// Restore submission order using each response's branch index. Responses
/// without one sort last, keeping their relative order.
pub(crate) fn in_submission_order(responses: &mut [Response]) {
    responses.sort_by_key(|r| {
        r.metadata
            .get(BRANCH_INDEX_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(u64::MAX)
    });
}

pub(crate) fn total_usage(responses: &[Response]) -> Usage {
    responses.iter().map(|r| r.usage).sum()
}

pub(crate) fn provider_names(responses: &[Response]) -> Vec<String> {
    responses.iter().map(|r| r.provider.clone()).collect()
}

/// Index of the first maximum of `key` over `items`; ties keep the earliest.
pub(crate) fn first_max_by<T, K: PartialOrd>(items: &[T], key: impl Fn(&T) -> K) -> usize {
    let mut best = 0;
    for i in 1..items.len() {
        if key(&items[i]) > key(&items[best]) {
            best = i;
        }
    }
    best
}

/// Send `prompt` to a judge provider under the context guard.
pub(crate) async fn ask_judge(
    combiner: &'static str,
    judge: &Arc<dyn Provider>,
    ctx: &ExecCtx,
    prompt: String,
) -> Result<Response> {
    let request = Request::new(prompt);
    ctx.guard(judge.generate_response(ctx, &request))
        .await
        .map_err(|e| PipelineError::Combiner {
            combiner,
            message: format!("judge '{}' failed: {}", judge.name(), e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in CombinerKind::ALL {
            assert_eq!(kind.as_str().parse::<CombinerKind>().unwrap(), kind);
        }
        assert_eq!(
            "Majority-Vote".parse::<CombinerKind>().unwrap(),
            CombinerKind::MajorityVote
        );
        assert!("weighted_dice".parse::<CombinerKind>().is_err());
    }

    #[test]
    fn test_first_max_prefers_earliest() {
        assert_eq!(first_max_by(&[1, 3, 3, 2], |x| *x), 1);
        assert_eq!(first_max_by(&[5], |x| *x), 0);
    }
}
