//! Multi-juror voting over candidate responses.
//!
//! Each juror is a provider that receives every candidate and replies with
//! a ballot:
//!
//! ```text
//! VOTE: 2
//! REASON: covers the edge cases the others miss
//! ```
//!
//! Jurors are asked concurrently. A juror that fails abstains; a ballot
//! whose vote is missing or out of range counts for response 1.

use super::judge::parse_labeled_number;
use super::{
    ensure_nonempty, first_max_by, in_submission_order, total_usage, ResultCombiner,
    COMBINER_KEY,
};
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::prompt;
use crate::provider::Provider;
use crate::types::{Request, Response, Usage};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

/// How juror ballots are turned into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    /// Most ballots wins; ties go to the lower response number.
    #[default]
    Majority,
    /// All jurors must agree; otherwise the majority result is returned
    /// with `consensus_reached: false`.
    Consensus,
    /// Each juror's ballot counts with its configured weight.
    Weighted,
}

impl VotingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingMethod::Majority => "majority",
            VotingMethod::Consensus => "consensus",
            VotingMethod::Weighted => "weighted",
        }
    }
}

impl FromStr for VotingMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "majority" => Ok(VotingMethod::Majority),
            "consensus" | "unanimous" => Ok(VotingMethod::Consensus),
            "weighted" => Ok(VotingMethod::Weighted),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown voting method '{}'",
                other
            ))),
        }
    }
}

/// One juror's parsed decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ballot {
    /// Zero-based index of the chosen response.
    pub choice: usize,
    pub reason: String,
}

impl Ballot {
    /// Parse a `VOTE:` / `REASON:` reply against `candidates` responses.
    pub fn parse(text: &str, candidates: usize) -> Self {
        let choice = parse_labeled_number(text, "VOTE", candidates).unwrap_or(1) - 1;
        let reason = text
            .lines()
            .find_map(|line| {
                let line = line.trim();
                let head = line.get(..7)?;
                head.eq_ignore_ascii_case("REASON:")
                    .then(|| line[7..].trim().to_string())
            })
            .unwrap_or_default();
        Self { choice, reason }
    }
}

/// Selects a response by polling a panel of juror providers.
pub struct JuryCombiner {
    jurors: Vec<Arc<dyn Provider>>,
    method: VotingMethod,
    weights: Vec<f64>,
}

impl JuryCombiner {
    pub fn new(jurors: Vec<Arc<dyn Provider>>, method: VotingMethod) -> Result<Self> {
        if jurors.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "jury combiner requires at least one juror".into(),
            ));
        }
        let weights = vec![1.0; jurors.len()];
        Ok(Self {
            jurors,
            method,
            weights,
        })
    }

    /// Per-juror weights for [`VotingMethod::Weighted`], in juror order.
    /// Missing entries default to 1.0.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() > self.jurors.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} weights given for {} jurors",
                weights.len(),
                self.jurors.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::InvalidConfig(
                "juror weights must be finite and non-negative".into(),
            ));
        }
        for (slot, w) in self.weights.iter_mut().zip(weights) {
            *slot = w;
        }
        Ok(self)
    }

    pub fn method(&self) -> VotingMethod {
        self.method
    }

    pub fn jurors(&self) -> &[Arc<dyn Provider>] {
        &self.jurors
    }

    /// Ask every juror concurrently. Returns `(juror index, ballot, usage)`
    /// for jurors that answered.
    async fn collect_ballots(
        &self,
        ctx: &ExecCtx,
        responses: &[Response],
    ) -> Vec<(usize, Ballot, Usage)> {
        let request = Request::new(prompt::jury_prompt(responses));
        let asks = self.jurors.iter().map(|juror| {
            let request = &request;
            async move { ctx.guard(juror.generate_response(ctx, request)).await }
        });

        join_all(asks)
            .await
            .into_iter()
            .enumerate()
            .filter_map(|(i, outcome)| match outcome {
                Ok(reply) => Some((i, Ballot::parse(&reply.content, responses.len()), reply.usage)),
                Err(e) => {
                    tracing::warn!(juror = self.jurors[i].name(), error = %e, "juror abstained");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl ResultCombiner for JuryCombiner {
    fn name(&self) -> &'static str {
        "jury"
    }

    async fn combine(&self, ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);
        let ballots = self.collect_ballots(ctx, &responses).await;
        if ballots.is_empty() {
            return Err(PipelineError::Combiner {
                combiner: "jury",
                message: format!("all {} jurors failed to vote", self.jurors.len()),
            });
        }

        let mut tally = vec![0.0_f64; responses.len()];
        for (juror, ballot, _) in &ballots {
            tally[ballot.choice] += match self.method {
                VotingMethod::Weighted => self.weights[*juror],
                VotingMethod::Majority | VotingMethod::Consensus => 1.0,
            };
        }
        let winner = first_max_by(&tally, |t| *t);
        let unanimous = ballots.iter().all(|(_, b, _)| b.choice == ballots[0].1.choice);

        let reasons: Vec<_> = ballots
            .iter()
            .map(|(juror, b, _)| {
                json!({
                    "juror": self.jurors[*juror].name(),
                    "vote": b.choice + 1,
                    "reason": b.reason,
                })
            })
            .collect();
        let juror_usage: Usage = ballots.iter().map(|(_, _, u)| *u).sum();

        let mut out = responses[winner]
            .clone()
            .with_usage(total_usage(&responses) + juror_usage)
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("voting_method", json!(self.method.as_str()))
            .with_metadata("votes", json!(tally[winner]))
            .with_metadata("total_votes", json!(ballots.len()))
            .with_metadata("abstentions", json!(self.jurors.len() - ballots.len()))
            .with_metadata("unanimous", json!(unanimous))
            .with_metadata("reasons", json!(reasons));
        if self.method == VotingMethod::Consensus {
            out = out.with_metadata("consensus_reached", json!(unanimous));
        }
        Ok(out)
    }
}
