//! Three mock providers answer the same question; a majority vote and a
//! judge-backed jury each pick one answer, then a serial chain refines it.
//!
//! Run with: cargo run --example ensemble_vote

use llm_ensemble::combiner::{JuryCombiner, MajorityVoteCombiner, VotingMethod};
use llm_ensemble::{
    Event, ExecCtx, FnEventHandler, MockProvider, ParallelPipeline, Pipeline, Provider, Request,
    SerialPipeline, SimplePipeline,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let panel: Vec<Arc<dyn Provider>> = vec![
        Arc::new(MockProvider::fixed("alpha", "Paris")),
        Arc::new(MockProvider::fixed("beta", "Paris")),
        Arc::new(MockProvider::fixed("gamma", "Lyon")),
    ];

    let ctx = ExecCtx::builder()
        .event_handler(Arc::new(FnEventHandler(|event: Event| match event {
            Event::PipelineStart { name, kind } => println!("  [start] {} ({})", name, kind),
            Event::PipelineEnd { name, ok } => println!("  [end]   {} ok={}", name, ok),
            _ => {}
        })))
        .build();

    println!("=== Majority vote ===");
    let vote = ParallelPipeline::new("vote", panel.clone(), Arc::new(MajorityVoteCombiner::new()))?;
    let answer = vote.execute_with_request(&ctx, Request::new("Capital of France?")).await?;
    println!("answer: {} (votes: {})\n", answer.content, answer.metadata["votes"]);

    println!("=== Jury ===");
    let jurors: Vec<Arc<dyn Provider>> = vec![
        Arc::new(MockProvider::fixed("juror-1", "VOTE: 1\nREASON: it is the capital")),
        Arc::new(MockProvider::fixed("juror-2", "VOTE: 1\nREASON: correct")),
    ];
    let jury = JuryCombiner::new(jurors, VotingMethod::Majority)?;
    let judged = ParallelPipeline::new("jury", panel, Arc::new(jury))?;
    let verdict = judged.execute_with_request(&ctx, Request::new("Capital of France?")).await?;
    println!("verdict: {}", verdict.content);
    println!("reasons: {}\n", verdict.metadata["reasons"]);

    println!("=== Serial refinement ===");
    let drafter: Arc<dyn Provider> = Arc::new(MockProvider::responder("drafter", |req| {
        format!("draft about {}", req.prompt)
    }));
    let editor: Arc<dyn Provider> = Arc::new(MockProvider::responder("editor", |req| {
        format!("{} (edited)", req.prompt)
    }));
    let chain = SerialPipeline::new(
        "draft-then-edit",
        vec![
            Arc::new(SimplePipeline::new(drafter)),
            Arc::new(SimplePipeline::new(editor)),
        ],
    )?;
    let text = chain.execute(&ctx, "rust").await?;
    println!("result: {}", text);

    Ok(())
}
