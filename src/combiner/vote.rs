use super::{ensure_nonempty, first_max_by, in_submission_order, ResultCombiner, COMBINER_KEY};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::Response;
use async_trait::async_trait;
use serde_json::json;

/// Picks the content returned by the most providers (exact match).
///
/// Ties go to the group seen first in submission order.
#[derive(Debug, Clone, Default)]
pub struct MajorityVoteCombiner;

impl MajorityVoteCombiner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResultCombiner for MajorityVoteCombiner {
    fn name(&self) -> &'static str {
        "majority_vote"
    }

    async fn combine(&self, _ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);

        // (first index, count) per distinct content, in first-seen order.
        let mut groups: Vec<(usize, usize)> = Vec::new();
        for (i, r) in responses.iter().enumerate() {
            match groups
                .iter_mut()
                .find(|(first, _)| responses[*first].content == r.content)
            {
                Some((_, count)) => *count += 1,
                None => groups.push((i, 1)),
            }
        }

        let (winner, votes) = groups[first_max_by(&groups, |(_, count)| *count)];
        let total = responses.len();
        Ok(responses[winner]
            .clone()
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("votes", json!(votes))
            .with_metadata("total_votes", json!(total))
            .with_metadata("distinct_answers", json!(groups.len())))
    }
}

/// Picks the response with the most characters; ties keep the earliest.
#[derive(Debug, Clone, Default)]
pub struct LongestResponseCombiner;

impl LongestResponseCombiner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResultCombiner for LongestResponseCombiner {
    fn name(&self) -> &'static str {
        "longest"
    }

    async fn combine(&self, _ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);
        let winner = first_max_by(&responses, |r| r.content.chars().count());
        let length = responses[winner].content.chars().count();
        Ok(responses[winner]
            .clone()
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("length", json!(length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(contents: &[&str]) -> Vec<Response> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| Response::new(*c, format!("p{}", i), "m"))
            .collect()
    }

    #[tokio::test]
    async fn test_majority_picks_most_common() {
        let out = MajorityVoteCombiner::new()
            .combine(&ExecCtx::new(), responses(&["A", "B", "A"]))
            .await
            .unwrap();
        assert_eq!(out.content, "A");
        assert_eq!(out.metadata["votes"], json!(2));
        assert_eq!(out.metadata["total_votes"], json!(3));
    }

    #[tokio::test]
    async fn test_majority_tie_goes_to_first_seen() {
        let out = MajorityVoteCombiner::new()
            .combine(&ExecCtx::new(), responses(&["B", "A", "A", "B", "C"]))
            .await
            .unwrap();
        assert_eq!(out.content, "B");
        assert_eq!(out.provider, "p0");
        assert_eq!(out.metadata["votes"], json!(2));
    }

    #[tokio::test]
    async fn test_majority_single_response() {
        let out = MajorityVoteCombiner::new()
            .combine(&ExecCtx::new(), responses(&["only"]))
            .await
            .unwrap();
        assert_eq!(out.metadata["votes"], json!(1));
    }

    #[tokio::test]
    async fn test_longest_tie_goes_to_first() {
        let out = LongestResponseCombiner::new()
            .combine(&ExecCtx::new(), responses(&["ab", "abcd", "wxyz", "a"]))
            .await
            .unwrap();
        assert_eq!(out.content, "abcd");
        assert_eq!(out.metadata["length"], json!(4));
    }

    #[tokio::test]
    async fn test_longest_counts_chars_not_bytes() {
        let out = LongestResponseCombiner::new()
            .combine(&ExecCtx::new(), responses(&["ééé", "abcd"]))
            .await
            .unwrap();
        assert_eq!(out.content, "abcd");
    }
}
