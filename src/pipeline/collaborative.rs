//! Multi-round discussion among providers.
//!
//! Round 1 broadcasts the caller's prompt to every participant at once.
//! Each later round shows every participant the transcript so far, tells it
//! which participant it is, and asks for a refined answer. Rounds run one
//! after another; calls within a round run concurrently.
//!
//! The rendered transcript is the result. A synthesizer provider can be
//! attached to turn the transcript into a single final answer.

use super::parallel::{fan_out, FanOut, BRANCH_INDEX_KEY};
use super::{instrumented, BoxFut, Pipeline, SharedPipeline};
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::options::{PipelineOption, PipelineOptions};
use crate::prompt;
use crate::provider::Provider;
use crate::types::{Request, Response, Usage};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// One synchronized cycle of provider calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Round {
    /// 1-indexed.
    pub number: usize,
    /// Successful answers, in participant order.
    pub responses: Vec<Response>,
}

/// Every round of a finished discussion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Discussion {
    pub rounds: Vec<Round>,
}

impl Discussion {
    pub fn transcript(&self) -> String {
        prompt::transcript(&self.rounds)
    }

    /// The last round's answers.
    pub fn final_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    pub fn usage(&self) -> Usage {
        self.rounds
            .iter()
            .flat_map(|r| r.responses.iter().map(|resp| resp.usage))
            .sum()
    }
}

/// Multi-round discussion between providers.
///
/// Round 1 sends the request to every participant at once. Each later round
/// shows every participant its own name and the transcript so far, and asks
/// for a refined answer. The rendered transcript is the output unless a
/// synthesizer is set.
#[derive(Clone)]
pub struct CollaborativePipeline {
    name: String,
    providers: Vec<Arc<dyn Provider>>,
    rounds: usize,
    synthesizer: Option<Arc<dyn Provider>>,
    options: PipelineOptions,
}

impl CollaborativePipeline {
    /// Fails if `providers` is empty or `rounds` is zero.
    pub fn new(
        name: impl Into<String>,
        providers: Vec<Arc<dyn Provider>>,
        rounds: usize,
    ) -> Result<Self> {
        let name = name.into();
        if providers.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "collaborative pipeline '{}' needs at least one provider",
                name
            )));
        }
        if rounds == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "collaborative pipeline '{}' needs at least one round",
                name
            )));
        }
        Ok(Self {
            name,
            providers,
            rounds,
            synthesizer: None,
            options: PipelineOptions::default(),
        })
    }

    /// Summarize the finished discussion with one extra call to `provider`.
    pub fn with_synthesizer(mut self, provider: Arc<dyn Provider>) -> Self {
        self.synthesizer = Some(provider);
        self
    }

    pub fn with_pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Run the discussion and return it without rendering.
    ///
    /// A participant that fails is left out of that round. The discussion
    /// fails if a round gets no answers at all.
    pub async fn discuss(&self, ctx: &ExecCtx, request: &Request) -> Result<Discussion> {
        let mut discussion = Discussion::default();

        for number in 1..=self.rounds {
            ctx.check_cancelled()?;
            emit(
                &ctx.event_handler,
                Event::RoundStart {
                    name: self.name.clone(),
                    round: number,
                    total: self.rounds,
                },
            );
            tracing::debug!(pipeline = %self.name, round = number, total = self.rounds, "round start");

            let branches = self
                .providers
                .iter()
                .map(|p| {
                    let req = if number == 1 {
                        request.clone()
                    } else {
                        request.with_prompt(prompt::refinement_prompt(
                            &request.prompt,
                            p.name(),
                            &discussion.rounds,
                        ))
                    };
                    (p.clone(), req)
                })
                .collect();

            let FanOut {
                mut responses,
                failures,
            } = fan_out(&self.name, ctx, branches, &self.options).await;
            if responses.is_empty() {
                return Err(PipelineError::AllBranchesFailed {
                    pipeline: self.name.clone(),
                    failures,
                }
                .wrap("round", format!("{} [round {}]", self.name, number)));
            }

            responses.sort_by_key(|r| r.metadata.get(BRANCH_INDEX_KEY).and_then(Value::as_u64));
            discussion.rounds.push(Round { number, responses });
        }

        Ok(discussion)
    }

    async fn run(&self, ctx: &ExecCtx, request: Request) -> Result<Response> {
        let discussion = self.discuss(ctx, &request).await?;
        let usage = discussion.usage();
        let participants: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();

        let response = match &self.synthesizer {
            None => Response::new(discussion.transcript(), participants.join(","), "")
                .with_usage(usage),
            Some(synth) => {
                let req = request.with_prompt(prompt::synthesis_prompt(
                    &request.prompt,
                    &discussion.rounds,
                ));
                let summary = ctx
                    .guard(synth.generate_response(ctx, &req))
                    .await
                    .map_err(|e| e.wrap("synthesize", self.name.clone()))?;
                let total = usage + summary.usage;
                summary
                    .with_usage(total)
                    .with_metadata("synthesized_by", json!(synth.name()))
            }
        };

        Ok(response
            .with_metadata("rounds", json!(discussion.rounds.len()))
            .with_metadata("participants", json!(participants)))
    }
}

impl Pipeline for CollaborativePipeline {
    fn kind(&self) -> &'static str {
        "collaborative"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_with_request<'a>(
        &'a self,
        ctx: &'a ExecCtx,
        request: Request,
    ) -> BoxFut<'a, Result<Response>> {
        Box::pin(instrumented(ctx, &self.name, "collaborative", self.run(ctx, request)))
    }

    /// Retry and fallback apply to each participant call. Cache options are
    /// kept but never consulted.
    fn with_options(&self, options: &[PipelineOption]) -> SharedPipeline {
        let options = self.options.apply(options);
        Arc::new(self.clone().with_pipeline_options(options))
    }
}

impl std::fmt::Debug for CollaborativePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborativePipeline")
            .field("name", &self.name)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("rounds", &self.rounds)
            .field("synthesizer", &self.synthesizer.as_ref().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FnEventHandler;
    use crate::provider::MockProvider;
    use parking_lot::Mutex;

    fn participant(name: &'static str) -> Arc<dyn Provider> {
        Arc::new(MockProvider::responder(name, move |req| {
            if req.prompt.contains("Discussion so far") {
                format!("{} refined", name)
            } else {
                format!("{} first take", name)
            }
        }))
    }

    #[tokio::test]
    async fn test_two_round_transcript() {
        let collab =
            CollaborativePipeline::new("talk", vec![participant("a"), participant("b")], 2)
                .unwrap();
        let resp = collab
            .execute_with_request(&ExecCtx::new(), Request::new("topic"))
            .await
            .unwrap();
        assert_eq!(
            resp.content,
            "## Round 1\n### a\na first take\n\n### b\nb first take\n\n\
             ## Round 2\n### a\na refined\n\n### b\nb refined"
        );
        assert_eq!(resp.metadata["rounds"], json!(2));
    }

    #[tokio::test]
    async fn test_later_rounds_see_identity_and_transcript() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let spy: Arc<dyn Provider> = Arc::new(MockProvider::responder("spy", move |req| {
            log.lock().push(req.prompt.clone());
            "noted".to_string()
        }));
        let collab = CollaborativePipeline::new("talk", vec![spy, participant("b")], 2).unwrap();
        collab.discuss(&ExecCtx::new(), &Request::new("topic")).await.unwrap();

        let prompts = seen.lock();
        assert_eq!(prompts[0], "topic");
        assert!(prompts[1].contains("You are spy."));
        assert!(prompts[1].contains("### b\nb first take"));
    }

    #[tokio::test]
    async fn test_failed_participant_is_skipped() {
        let collab = CollaborativePipeline::new(
            "talk",
            vec![
                participant("a"),
                Arc::new(MockProvider::failing("down", "offline")),
            ],
            2,
        )
        .unwrap();
        let discussion = collab
            .discuss(&ExecCtx::new(), &Request::new("topic"))
            .await
            .unwrap();
        assert!(discussion.rounds.iter().all(|r| r.responses.len() == 1));
    }

    #[tokio::test]
    async fn test_round_with_no_answers_fails() {
        let collab = CollaborativePipeline::new(
            "talk",
            vec![Arc::new(MockProvider::failing("down", "offline")) as Arc<dyn Provider>],
            3,
        )
        .unwrap();
        let err = collab.execute(&ExecCtx::new(), "topic").await.unwrap_err();
        assert!(matches!(err.root(), PipelineError::AllBranchesFailed { .. }));
    }

    #[tokio::test]
    async fn test_synthesizer_gets_transcript() {
        let synth = Arc::new(MockProvider::responder("judge", |req| {
            assert!(req.prompt.contains("## Round 1"));
            "final answer".to_string()
        }));
        let collab = CollaborativePipeline::new("talk", vec![participant("a")], 1)
            .unwrap()
            .with_synthesizer(synth);
        let resp = collab
            .execute_with_request(&ExecCtx::new(), Request::new("topic"))
            .await
            .unwrap();
        assert_eq!(resp.content, "final answer");
        assert_eq!(resp.metadata["synthesized_by"], json!("judge"));
    }

    #[tokio::test]
    async fn test_round_events() {
        let rounds = Arc::new(Mutex::new(Vec::new()));
        let sink = rounds.clone();
        let ctx = ExecCtx::builder()
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                if let Event::RoundStart { round, .. } = e {
                    sink.lock().push(round);
                }
            })))
            .build();
        CollaborativePipeline::new("talk", vec![participant("a")], 3)
            .unwrap()
            .execute(&ctx, "topic")
            .await
            .unwrap();
        assert_eq!(*rounds.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_rounds_rejected() {
        assert!(CollaborativePipeline::new("talk", vec![participant("a")], 0).is_err());
    }
}
