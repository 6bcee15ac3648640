//! Meta-prompt builders for judges, jurors, and collaborative rounds.

use crate::pipeline::collaborative::Round;
use crate::types::Response;

/// `## label` heading over `body` with surrounding blank lines dropped.
pub(crate) fn section(label: &str, body: &str) -> String {
    format!("## {}\n{}", label, body.trim_matches('\n'))
}

/// Render candidates as `## Response N (from provider)` sections, 1-indexed.
pub fn candidate_list(responses: &[Response]) -> String {
    responses
        .iter()
        .enumerate()
        .map(|(i, r)| {
            section(
                &format!("Response {} (from {})", i + 1, r.provider),
                r.content.trim(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt asking a judge to pick the best candidate.
pub fn best_picker_prompt(responses: &[Response]) -> String {
    format!(
        "You are evaluating {} candidate responses to the same request.\n\n{}\n\n\
         Pick the single best response for accuracy, completeness, and clarity. \
         Start your answer with a line `BEST: <number>` and then justify the choice.",
        responses.len(),
        candidate_list(responses)
    )
}

/// Prompt asking a judge to merge candidates into one agreed answer.
pub fn consensus_prompt(responses: &[Response]) -> String {
    format!(
        "Several assistants answered the same request.\n\n{}\n\n\
         Identify the points they agree on, resolve any disagreements, and write \
         one consensus answer that reflects the shared conclusion. Reply with the \
         consensus answer only.",
        candidate_list(responses)
    )
}

/// Prompt asking a juror for a ballot in the `VOTE:` / `REASON:` protocol.
pub fn jury_prompt(responses: &[Response]) -> String {
    format!(
        "You are a juror choosing the best of {n} responses.\n\n{}\n\n\
         Reply in exactly this format:\nVOTE: <number from 1 to {n}>\nREASON: <one sentence>",
        candidate_list(responses),
        n = responses.len()
    )
}

/// Render completed rounds as a markdown transcript.
pub fn transcript(rounds: &[Round]) -> String {
    rounds
        .iter()
        .map(|round| {
            let body = round
                .responses
                .iter()
                .map(|r| format!("### {}\n{}", r.provider, r.content.trim()))
                .collect::<Vec<_>>()
                .join("\n\n");
            section(&format!("Round {}", round.number), &body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt for one participant in a refinement round.
pub fn refinement_prompt(original: &str, participant: &str, prior: &[Round]) -> String {
    format!(
        "{}\n\n{}\n\nYou are {}. Review the discussion so far, address points \
         raised by the other participants, and give your refined answer.",
        section("Original request", original),
        section("Discussion so far", &transcript(prior)),
        participant
    )
}

/// Prompt for the optional closing synthesis of a discussion.
pub fn synthesis_prompt(original: &str, rounds: &[Round]) -> String {
    format!(
        "{}\n\n{}\n\nSummarize the discussion into one final answer to the original request.",
        section("Original request", original),
        section("Discussion", &transcript(rounds))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_drops_blank_edges() {
        assert_eq!(section("Evaluation", "\n  fine\n\n"), "## Evaluation\n  fine");
        assert_eq!(section("Empty", ""), "## Empty\n");
    }

    #[test]
    fn test_candidate_list_is_one_indexed() {
        let text = candidate_list(&[
            Response::new("alpha", "a", "m"),
            Response::new("beta\n", "b", "m"),
        ]);
        assert_eq!(
            text,
            "## Response 1 (from a)\nalpha\n\n## Response 2 (from b)\nbeta"
        );
    }

    #[test]
    fn test_jury_prompt_states_range() {
        let text = jury_prompt(&[Response::new("x", "a", "m"), Response::new("y", "b", "m")]);
        assert!(text.contains("VOTE: <number from 1 to 2>"));
        assert!(text.contains("REASON:"));
    }

    #[test]
    fn test_transcript_and_refinement() {
        let rounds = vec![Round {
            number: 1,
            responses: vec![Response::new("idea", "a", "m")],
        }];
        assert_eq!(transcript(&rounds), "## Round 1\n### a\nidea");
        let prompt = refinement_prompt("solve it", "b", &rounds);
        assert!(prompt.starts_with("## Original request\nsolve it"));
        assert!(prompt.contains("You are b."));
    }
}
