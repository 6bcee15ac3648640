use super::{ensure_nonempty, in_submission_order, ResultCombiner, COMBINER_KEY};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::types::Response;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotates through responses call by call, ignoring content.
///
/// Responses are ordered by branch index first so the rotation follows
/// submission order rather than completion order.
#[derive(Debug, Default)]
pub struct RoundRobinCombiner {
    next: AtomicUsize,
}

impl RoundRobinCombiner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCombiner for RoundRobinCombiner {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn combine(&self, _ctx: &ExecCtx, mut responses: Vec<Response>) -> Result<Response> {
        ensure_nonempty(&responses)?;
        in_submission_order(&mut responses);
        let selected = self.next.fetch_add(1, Ordering::Relaxed) % responses.len();
        Ok(responses
            .swap_remove(selected)
            .with_metadata(COMBINER_KEY, json!(self.name()))
            .with_metadata("selected_index", json!(selected)))
    }
}
