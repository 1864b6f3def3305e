//! ConvergenceLoop - drives rounds of the role pipeline to a terminal state

use std::collections::BTreeMap;
use std::sync::Arc;

use handlebars::Handlebars;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ConvergenceError, LoopConfig, LoopState, Outcome, Round, Session, Snapshot};
use crate::highlight::highlight_with;
use crate::pipeline::{PipelineError, RoleEvent, RolePipeline};
use crate::roles::{PlaceholderContext, keyword_text, template_engine};
use crate::score::{clamp_score, extract_score};

/// Capacity of the per-round role event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Task text handed to the pipeline for round `round`
pub fn round_task(session: &Session, round: u32) -> String {
    let mut task = format!("Generate content for: {} (round {})", session.topic, round);
    if !session.target_met() {
        if round > 1 {
            task.push_str(&format!(
                "\nThe previous round scored {}/10.",
                session.verified_score
            ));
        }
        task.push_str(&format!(
            "\nImprove the content until it scores at least {}/10, using these keywords: {}.",
            session.target_score,
            keyword_text(&session.keywords)
        ));
    }
    task
}

/// Run the pipeline once and gather its events
///
/// Empty outputs are dropped here so they can never overwrite earlier text.
async fn collect_round(pipeline: &dyn RolePipeline, task: &str) -> Result<BTreeMap<String, String>, PipelineError> {
    let (tx, mut rx) = mpsc::channel::<RoleEvent>(EVENT_CHANNEL_CAPACITY);
    let drain = async move {
        let mut outputs = BTreeMap::new();
        while let Some(event) = rx.recv().await {
            debug!(role = %event.role, chars = event.text.len(), "collect_round: role event");
            if !event.text.trim().is_empty() {
                outputs.insert(event.role, event.text);
            }
        }
        outputs
    };

    let (result, outputs) = tokio::join!(pipeline.run(task, tx), drain);
    result?;
    Ok(outputs)
}

/// Iterates the role pipeline on one session until it converges, runs out
/// of rounds, stagnates or fails
pub struct ConvergenceLoop {
    session: Session,
    config: LoopConfig,
    pipeline: Arc<dyn RolePipeline>,
    state: LoopState,
    handlebars: Handlebars<'static>,
}

impl ConvergenceLoop {
    pub fn new(session: Session, config: LoopConfig, pipeline: Arc<dyn RolePipeline>) -> Self {
        debug!(session_id = %session.id, topic = %session.topic, "ConvergenceLoop::new: called");
        Self {
            session,
            config,
            pipeline,
            state: LoopState::Idle,
            handlebars: template_engine(),
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Idle -> Running(1)
    pub fn start(&mut self) -> Result<(), ConvergenceError> {
        if self.state != LoopState::Idle {
            return Err(ConvergenceError::InvalidSession(format!("loop already {}", self.state)));
        }
        info!(
            session_id = %self.session.id,
            topic = %self.session.topic,
            target = self.session.target_score,
            max_rounds = self.session.max_rounds,
            "Convergence loop started"
        );
        self.state = LoopState::Running { round: 1 };
        Ok(())
    }

    /// Run one round and return its snapshot, or `None` once terminal
    pub async fn advance(&mut self) -> Result<Option<Snapshot>, ConvergenceError> {
        let round = match self.state {
            LoopState::Idle => return Err(ConvergenceError::InvalidSession("loop not started".to_string())),
            LoopState::Running { round } => round,
            _ => return Ok(None),
        };

        let task = round_task(&self.session, round);
        info!(round, max_rounds = self.session.max_rounds, "Round starting");

        let pipeline = Arc::clone(&self.pipeline);
        let result = self
            .config
            .retry
            .run_with_floor(
                || {
                    let pipeline = Arc::clone(&pipeline);
                    let task = task.clone();
                    async move { collect_round(pipeline.as_ref(), &task).await }
                },
                PipelineError::is_transient,
                PipelineError::retry_after,
            )
            .await;

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(e) => {
                let role = e.last_error().role().unwrap_or("-");
                warn!(round, role, attempts = e.attempts, error = %e.last_error(), "Round failed");
                self.state = LoopState::Failed {
                    error: e.last_error().to_string(),
                };
                return Err(ConvergenceError::PipelineFailed {
                    round,
                    attempts: e.attempts,
                    source: e.into_inner(),
                });
            }
        };

        let previous = self.session.results.clone();
        self.session.absorb(&outputs);

        let review = self
            .config
            .review_role
            .as_ref()
            .and_then(|role| outputs.get(role))
            .and_then(|text| extract_score(text))
            .map(clamp_score);
        let verified = outputs.get(&self.config.score_role).and_then(|text| extract_score(text));
        let score_parsed = verified.is_some() || review.is_some();
        let verified = clamp_score(verified.or(review).unwrap_or(self.session.verified_score));
        if !score_parsed {
            debug!(round, "advance: no score in round output, keeping last verified score");
        }

        self.session.round = round;
        self.session.verified_score = verified;
        if review.is_some() {
            self.session.review_score = review;
        }
        self.session.rounds.push(Round {
            index: round,
            task,
            outputs,
            score: verified,
            score_parsed,
            review_score: review,
        });

        self.state = if self.session.target_met() {
            LoopState::Converged
        } else if round > 1 && self.is_stagnant(&previous) {
            LoopState::Stagnant
        } else if round >= self.session.max_rounds {
            LoopState::Exhausted
        } else {
            LoopState::Running { round: round + 1 }
        };
        info!(round, verified_score = verified, review_score = ?review, state = %self.state, "Round finished");

        let highlights = self.highlights(&previous);
        if self.state.is_terminal() {
            self.fill_placeholders();
        }

        Ok(Some(Snapshot {
            session_id: self.session.id,
            topic: self.session.topic.clone(),
            round,
            max_rounds: self.session.max_rounds,
            state: self.state.clone(),
            verified_score: self.session.verified_score,
            review_score: self.session.review_score,
            target_score: self.session.target_score,
            results: self.session.results.clone(),
            highlights,
        }))
    }

    /// Drive the loop to completion, sending each snapshot to `sink`
    ///
    /// A closed sink stops the loop after the round that was in flight.
    pub async fn run(&mut self, sink: Option<mpsc::Sender<Snapshot>>) -> Result<Outcome, ConvergenceError> {
        debug!(has_sink = sink.is_some(), "ConvergenceLoop::run: called");
        if self.state == LoopState::Idle {
            self.start()?;
        }

        while let Some(snapshot) = self.advance().await? {
            let round = snapshot.round;
            if let Some(tx) = &sink
                && tx.send(snapshot).await.is_err()
                && !self.state.is_terminal()
            {
                info!(round, "Snapshot receiver dropped, stopping loop");
                return Err(ConvergenceError::Cancelled { round });
            }
        }

        self.outcome()
            .ok_or_else(|| ConvergenceError::InvalidSession(format!("loop ended {}", self.state)))
    }

    /// Final result, available once the loop ended without failing
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            LoopState::Converged | LoopState::Exhausted | LoopState::Stagnant => Some(Outcome {
                session_id: self.session.id,
                topic: self.session.topic.clone(),
                keywords: self.session.keywords.clone(),
                state: self.state.clone(),
                rounds: self.session.round,
                target_score: self.session.target_score,
                verified_score: self.session.verified_score,
                review_score: self.session.review_score,
                results: self.session.results.clone(),
            }),
            _ => None,
        }
    }

    /// True when every compared role's text is unchanged from `previous`
    ///
    /// Compared roles are the tracked ones, or every role when none is tracked.
    fn is_stagnant(&self, previous: &BTreeMap<String, String>) -> bool {
        let tracked = self.config.tracked_roles();
        let roles: Vec<&str> = if tracked.is_empty() {
            previous
                .keys()
                .chain(self.session.results.keys())
                .map(String::as_str)
                .collect()
        } else {
            tracked
        };

        let unchanged = roles.iter().all(|role| {
            let before = previous.get(*role).map(|t| t.trim());
            let after = self.session.results.get(*role).map(|t| t.trim());
            before == after
        });
        if unchanged {
            debug!(roles = ?roles, "is_stagnant: tracked output unchanged");
        }
        unchanged
    }

    fn highlights(&self, previous: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        self.config
            .slots
            .iter()
            .filter(|slot| slot.tracked)
            .filter_map(|slot| {
                let current = self.session.results.get(&slot.name)?;
                let before = previous.get(&slot.name).map_or("", String::as_str);
                Some((slot.name.clone(), highlight_with(before, current, &slot.markup)))
            })
            .collect()
    }

    /// Give every role that never produced output its placeholder text
    fn fill_placeholders(&mut self) {
        let context = PlaceholderContext {
            topic: self.session.topic.clone(),
            score: self.session.review_score.unwrap_or(self.session.verified_score),
            verified_score: self.session.verified_score,
            target_score: self.session.target_score,
        };

        for slot in &self.config.slots {
            if self.session.results.contains_key(&slot.name) || slot.placeholder.is_empty() {
                continue;
            }
            let text = match self.handlebars.render_template(&slot.placeholder, &context) {
                Ok(text) => text,
                Err(e) => {
                    warn!(role = %slot.name, error = %e, "Placeholder failed to render, using it verbatim");
                    slot.placeholder.clone()
                }
            };
            debug!(role = %slot.name, "fill_placeholders: role never produced output");
            self.session.results.insert(slot.name.clone(), text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::RoleSlot;
    use crate::highlight::Markup;
    use crate::llm::LlmError;
    use crate::pipeline::scripted::ScriptedPipeline;
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    fn config() -> LoopConfig {
        LoopConfig::new(
            vec![
                RoleSlot::new("WriterAgent")
                    .tracked(Markup::Plain)
                    .with_placeholder("Sample content for {{topic}}."),
                RoleSlot::new("ReviewerAgent").with_placeholder("Score: {{score}}/10"),
                RoleSlot::new("ScoreVerifierAgent"),
            ],
            "ScoreVerifierAgent",
        )
        .with_review_role("ReviewerAgent")
        .with_retry(RetryPolicy::new(3, 2.0).without_jitter())
    }

    fn new_loop(pipeline: Arc<ScriptedPipeline>, target: u8, max_rounds: u32) -> ConvergenceLoop {
        let session = Session::new("Two-Tier ERP", target, vec!["cloud".to_string()], max_rounds).unwrap();
        ConvergenceLoop::new(session, config(), pipeline)
    }

    #[tokio::test]
    async fn test_advance_requires_start() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[]));
        let mut lp = new_loop(pipeline, 10, 3);
        assert!(matches!(lp.advance().await, Err(ConvergenceError::InvalidSession(_))));
        lp.start().unwrap();
        assert!(lp.start().is_err());
    }

    #[tokio::test]
    async fn test_converges_on_verified_score() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[
            &[("WriterAgent", "draft 1"), ("ReviewerAgent", "Score: 6/10")],
            &[("WriterAgent", "draft 2"), ("ReviewerAgent", "7/10"), ("ScoreVerifierAgent", "Verified 9/10")],
        ]));
        let mut lp = new_loop(pipeline.clone(), 9, 5);
        lp.start().unwrap();

        let first = lp.advance().await.unwrap().unwrap();
        assert_eq!(first.round, 1);
        assert_eq!(first.verified_score, 6);
        assert_eq!(first.state, LoopState::Running { round: 2 });
        assert_eq!(first.highlights["WriterAgent"], "draft 1");

        let second = lp.advance().await.unwrap().unwrap();
        assert_eq!(second.state, LoopState::Converged);
        assert_eq!(second.verified_score, 9);
        assert_eq!(second.review_score, Some(7));
        assert_eq!(second.highlights["WriterAgent"], "{+draft 2+}");

        assert!(lp.advance().await.unwrap().is_none());
        assert_eq!(pipeline.call_count(), 2);

        let outcome = lp.outcome().unwrap();
        assert!(outcome.target_reached());
        assert_eq!(outcome.rounds, 2);
    }

    #[tokio::test]
    async fn test_unparsed_score_keeps_last_verified() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[
            &[("WriterAgent", "a"), ("ScoreVerifierAgent", "5/10")],
            &[("WriterAgent", "b"), ("ScoreVerifierAgent", "no idea")],
        ]));
        let mut lp = new_loop(pipeline, 10, 2);
        let outcome = lp.run(None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Exhausted);
        assert_eq!(outcome.verified_score, 5);
        assert!(!lp.session().rounds[1].score_parsed);
    }

    #[tokio::test]
    async fn test_stagnation_ignores_whitespace_and_untracked() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[
            &[("WriterAgent", "same text"), ("ReviewerAgent", "3/10")],
            &[("WriterAgent", "same text\n"), ("ReviewerAgent", "4/10")],
        ]));
        let mut lp = new_loop(pipeline.clone(), 10, 5);
        let outcome = lp.run(None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Stagnant);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(pipeline.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_output_retained_and_placeholders_filled() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[&[("WriterAgent", ""), ("ScoreVerifierAgent", "4/10")]]));
        let mut lp = new_loop(pipeline, 10, 1);
        let outcome = lp.run(None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Exhausted);
        assert_eq!(outcome.text("WriterAgent"), Some("Sample content for Two-Tier ERP."));
        assert_eq!(outcome.text("ReviewerAgent"), Some("Score: 4/10"));
        assert_eq!(outcome.text("ScoreVerifierAgent"), Some("4/10"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_round() {
        let pipeline = Arc::new(ScriptedPipeline::new(vec![
            Err(PipelineError::Malformed("truncated".to_string())),
            Ok(vec![RoleEvent::new("ScoreVerifierAgent", "10/10")]),
        ]));
        let mut lp = new_loop(pipeline.clone(), 10, 3);
        let outcome = lp.run(None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Converged);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(pipeline.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_round_waits_requested_time() {
        let pipeline = Arc::new(ScriptedPipeline::new(vec![
            Err(PipelineError::Llm {
                role: "WriterAgent".to_string(),
                source: LlmError::RateLimited {
                    retry_after: Duration::from_secs(45),
                },
            }),
            Ok(vec![RoleEvent::new("ScoreVerifierAgent", "10/10")]),
        ]));
        let mut lp = new_loop(pipeline.clone(), 10, 3);
        let start = tokio::time::Instant::now();
        let outcome = lp.run(None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Converged);
        assert_eq!(pipeline.call_count(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_permanent_failure_fails_loop() {
        let pipeline = Arc::new(ScriptedPipeline::new(vec![Err(PipelineError::ChannelClosed)]));
        let mut lp = new_loop(pipeline.clone(), 10, 3);
        let err = lp.run(None).await.unwrap_err();
        assert!(matches!(err, ConvergenceError::PipelineFailed { round: 1, attempts: 1, .. }));
        assert!(matches!(lp.state(), LoopState::Failed { .. }));
        assert!(lp.outcome().is_none());
        assert!(lp.advance().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_sink_cancels_between_rounds() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[
            &[("WriterAgent", "a"), ("ScoreVerifierAgent", "2/10")],
            &[("WriterAgent", "b"), ("ScoreVerifierAgent", "3/10")],
        ]));
        let mut lp = new_loop(pipeline.clone(), 10, 5);
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let err = lp.run(Some(tx)).await.unwrap_err();
        assert!(matches!(err, ConvergenceError::Cancelled { round: 1 }));
        assert_eq!(pipeline.call_count(), 1);
    }

    #[tokio::test]
    async fn test_round_task_text() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[
            &[("WriterAgent", "a"), ("ScoreVerifierAgent", "2/10")],
            &[("WriterAgent", "b"), ("ScoreVerifierAgent", "10/10")],
        ]));
        let mut lp = new_loop(pipeline.clone(), 10, 5);
        lp.run(None).await.unwrap();

        let tasks = pipeline.tasks();
        assert!(tasks[0].starts_with("Generate content for: Two-Tier ERP (round 1)"));
        assert!(tasks[0].contains("at least 10/10"));
        assert!(tasks[0].contains("cloud"));
        assert!(tasks[1].contains("(round 2)"));
        assert!(tasks[1].contains("previous round scored 2/10"));
    }

    #[tokio::test]
    async fn test_stagnation_compares_all_roles_when_none_tracked() {
        let pipeline = Arc::new(ScriptedPipeline::rounds(&[
            &[("A", "x"), ("B", "1/10")],
            &[("A", "x"), ("B", "2/10")],
            &[("A", "x"), ("B", "2/10")],
        ]));
        let session = Session::new("ERP", 10, vec![], 5).unwrap();
        let mut lp = ConvergenceLoop::new(session, LoopConfig::new(vec![RoleSlot::new("A")], "B"), pipeline);
        let outcome = lp.run(None).await.unwrap();
        assert_eq!(outcome.state, LoopState::Stagnant);
        assert_eq!(outcome.rounds, 3);
    }
}
