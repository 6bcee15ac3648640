//! Build pipelines from JSON configs and keep them in a directory store.
//!
//! Run with: cargo run --example declarative_config

use llm_ensemble::config::{ConfigFactory, ConfigStore, DirConfigStore};
use llm_ensemble::{ExecCtx, MockProvider, Pipeline, PipelineFactory, ProviderRegistry};
use std::sync::Arc;

const REVIEW_CONFIG: &str = r#"{
  "name": "review",
  "type": "nested",
  "stages": [
    {
      "name": "draft",
      "type": "high-availability",
      "providers": ["flaky", "steady"]
    },
    {
      "name": "panel",
      "type": "consensus",
      "providers": ["steady", "careful"],
      "combiner_config": { "judge_provider": "judge" }
    }
  ],
  "output_transform": "trim"
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Arc::new(MockProvider::failing("flaky", "upstream unavailable")));
    registry.register(Arc::new(MockProvider::responder("steady", |req| {
        format!("steady take on: {}", req.prompt)
    })));
    registry.register(Arc::new(MockProvider::responder("careful", |req| {
        format!("careful take on: {}", req.prompt)
    })));
    registry.register(Arc::new(MockProvider::fixed(
        "judge",
        "  Both drafts agree the topic deserves attention.  ",
    )));

    let configs = ConfigFactory::new(PipelineFactory::new(registry));

    let dir = std::env::temp_dir().join("llm-ensemble-demo");
    let store = DirConfigStore::open(&dir)?;
    let saved = store.import(REVIEW_CONFIG)?;
    println!("stored '{}' in {}", saved.name, store.dir().display());
    println!("configs: {:?}\n", store.list()?);

    let pipeline = configs.create_from_store(&store, "review")?;
    let ctx = ExecCtx::new();
    let response = pipeline.execute(&ctx, "memory safety").await?;
    println!("{}\n", response);

    println!("exported:\n{}", store.export("review")?);
    store.delete("review")?;
    Ok(())
}
