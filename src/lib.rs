//! # LLM Ensemble
//!
//! Composable pipelines over interchangeable AI providers.
//!
//! Every unit of work is a [`Pipeline`]: it takes a prompt or [`Request`]
//! and produces a [`Response`]. Pipelines nest freely, so a parallel vote
//! can be a stage of a serial chain that is itself the inner pipeline of a
//! transform.
//!
//! ## Core Concepts
//!
//! - **[`Provider`]**: object-safe trait over one AI back-end. The crate
//!   ships only [`MockProvider`]; vendor adapters live outside.
//! - **[`ExecCtx`]**: per-call context carrying cancellation, an optional
//!   deadline, and an optional event handler.
//! - **Pipelines**: [`SimplePipeline`] (retry, fallback, cache),
//!   [`ParallelPipeline`] (fan-out plus a [`ResultCombiner`]),
//!   [`SerialPipeline`], [`CollaborativePipeline`], [`BalancedPipeline`],
//!   and the function/transform adapters.
//! - **Combiners**: concatenation, majority vote, longest, quality score,
//!   round-robin, judge-based best pick and consensus, and a voting jury.
//! - **[`PipelineFactory`]** and **[`ConfigFactory`]**: build pipelines from
//!   provider names or from declarative [`PipelineConfig`]s.
//!
//! ## Quick Start
//!
//! ```
//! use llm_ensemble::combiner::MajorityVoteCombiner;
//! use llm_ensemble::{ExecCtx, MockProvider, ParallelPipeline, Pipeline, Provider};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let providers: Vec<Arc<dyn Provider>> = vec![
//!     Arc::new(MockProvider::fixed("a", "Paris")),
//!     Arc::new(MockProvider::fixed("b", "Paris")),
//!     Arc::new(MockProvider::fixed("c", "Lyon")),
//! ];
//! let vote = ParallelPipeline::new("capital", providers, Arc::new(MajorityVoteCombiner::new()))
//!     .unwrap();
//!
//! let answer = vote.execute(&ExecCtx::new(), "Capital of France?").await.unwrap();
//! assert_eq!(answer, "Paris");
//! # });
//! ```

pub mod cache;
pub mod combiner;
pub mod config;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod factory;
pub mod options;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod types;

pub use combiner::{CombinerKind, ResultCombiner};
pub use config::{ConfigFactory, ConfigStore, PipelineConfig, PipelineType};
pub use error::{BranchFailure, PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use factory::{PipelineBuilder, PipelineFactory};
pub use options::{PipelineOption, PipelineOptions};
pub use pipeline::{
    BalancedPipeline, BoxFut, CollaborativePipeline, FunctionAdapter, ParallelPipeline, Pipeline,
    SerialPipeline, SharedPipeline, SimplePipeline, TransformAdapter,
};
pub use provider::{MockProvider, Provider, ProviderConfig, ProviderRegistry};
pub use types::{Request, Response, ResponseChunk, Usage};
