//! One-of-N load distribution over equivalent pipeline instances.

use super::{instrumented, BoxFut, Pipeline, SharedPipeline};
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::options::PipelineOption;
use crate::types::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How [`BalancedPipeline`] picks an instance for each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    Random,
}

impl FromStr for BalanceStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(BalanceStrategy::RoundRobin),
            "random" => Ok(BalanceStrategy::Random),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown balance strategy '{}'",
                other
            ))),
        }
    }
}

/// Sends each call to exactly one of its instances.
///
/// Instances are expected to be interchangeable. Failures are not retried
/// on another instance; configure retries and fallbacks on the instances
/// themselves (which [`Pipeline::with_options`] does for all of them).
pub struct BalancedPipeline {
    name: String,
    instances: Vec<SharedPipeline>,
    strategy: BalanceStrategy,
    next: AtomicUsize,
}

impl BalancedPipeline {
    /// Fails if `instances` is empty.
    pub fn new(
        name: impl Into<String>,
        instances: Vec<SharedPipeline>,
        strategy: BalanceStrategy,
    ) -> Result<Self> {
        let name = name.into();
        if instances.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "balanced pipeline '{}' needs at least one instance",
                name
            )));
        }
        Ok(Self {
            name,
            instances,
            strategy,
            next: AtomicUsize::new(0),
        })
    }

    pub fn instances(&self) -> &[SharedPipeline] {
        &self.instances
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    fn select(&self) -> usize {
        match self.strategy {
            BalanceStrategy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.instances.len()
            }
            BalanceStrategy::Random => fastrand::usize(..self.instances.len()),
        }
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        let index = self.select();
        let instance = &self.instances[index];
        tracing::debug!(pipeline = %self.name, instance = index, "balanced selection");
        let response = instance
            .execute_with_request(ctx, request)
            .await
            .map_err(|e| e.wrap("execute", format!("{} [instance {}]", self.name, index)))?;
        Ok(response.with_metadata("instance", json!(index)))
    }
}

impl Pipeline for BalancedPipeline {
    fn kind(&self) -> &'static str {
        "balanced"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, "balanced", self.run(ctx, request)))
    }

    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline {
        Arc::new(Self {
            name: self.name.clone(),
            instances: self.instances.iter().map(|i| i.with_options(options)).collect(),
            strategy: self.strategy,
            next: AtomicUsize::new(self.next.load(Ordering::Relaxed)),
        })
    }
}

impl std::fmt::Debug for BalancedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancedPipeline")
            .field("name", &self.name)
            .field("instances", &self.instances.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}
