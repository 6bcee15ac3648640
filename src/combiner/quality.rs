use super::{ensure_nonempty, first_max_by, in_submission_order, ResultCombiner, COMBINER_KEY};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::Response;
use async_trait::async_trait;
use serde_json::json;

const LENGTH_WEIGHT: f64 = 0.6;
const PARAGRAPH_WEIGHT: f64 = 0.25;
const LIST_WEIGHT: f64 = 0.15;
/// Structural signals saturate at this many occurrences.
const STRUCTURE_CAP: usize = 5;

/// Scores each response with a length and structure heuristic and keeps the best.
///
/// The score lies in `[0, 1]`:
/// - length: word count relative to `base_tokens`, capped at 1.0
/// - paragraph breaks (blank-line separated blocks beyond the first)
/// - list items (`- `, `* `, `+ `, `1. `, `1) `)
#[derive(Debug, Clone)]
pub struct QualityScoreCombiner {
    base_tokens: usize,
}

impl QualityScoreCombiner {
    pub fn new(base_tokens: usize) -> Self {
        Self {
            base_tokens: base_tokens.max(1),
        }
    }

    pub fn score(&self, content: &str) -> f64 {
        let words = content.split_whitespace().count() as f64;
        let length = (words / self.base_tokens as f64).min(1.0);

        let paragraphs = content
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count()
            .saturating_sub(1)
            .min(STRUCTURE_CAP);

        let list_items = content
            .lines()
            .filter(|l| is_list_item(l.trim_start()))
            .count()
            .min(STRUCTURE_CAP);

        LENGTH_WEIGHT * length
            + PARAGRAPH_WEIGHT * paragraphs as f64 / STRUCTURE_CAP as f64
            + LIST_WEIGHT * list_items as f64 / STRUCTURE_CAP as f64
    }
}

impl Default for QualityScoreCombiner {
    fn default() -> Self {
        Self::new(200)
    }
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (line[digits..].starts_with(". ") || line[digits..].starts_with(") "))
}

#[async_trait]
impl ResultCombiner for QualityScoreCombiner {
    fn name(&self) -> &'static str {
        "quality_score"
    }

    async fn combine(&self, _ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);
        let scores: Vec<f64> = responses.iter().map(|r| self.score(&r.content)).collect();
        let winner = first_max_by(&scores, |s| *s);
        let breakdown: Vec<_> = responses
            .iter()
            .zip(&scores)
            .map(|(r, s)| json!({ "provider": r.provider, "score": s }))
            .collect();

        Ok(responses[winner]
            .clone()
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("quality_score", json!(scores[winner]))
            .with_metadata("scores", json!(breakdown)))
    }
}
