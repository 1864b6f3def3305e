//! Integration tests for the convergence loop
//!
//! These drive the public API end to end with scripted collaborators in place
//! of the hosted LLM.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use poststore::PostStore;
use scoreloop::convergence::{ConvergenceError, ConvergenceLoop, LoopConfig, LoopState, Session};
use scoreloop::highlight::MarkupStyle;
use scoreloop::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use scoreloop::pipeline::{LlmRolePipeline, PipelineError, RoleEvent, RolePipeline, SectionedPipeline};
use scoreloop::publish::build_post;
use scoreloop::retry::RetryPolicy;
use scoreloop::roles::{PipelineMode, PromptContext, RoleRoster};
use tempfile::TempDir;

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Replays one scripted invocation per call
struct Script {
    rounds: Mutex<VecDeque<Result<Vec<(String, String)>, PipelineError>>>,
    calls: AtomicUsize,
}

impl Script {
    fn new(rounds: Vec<Result<Vec<(&str, &str)>, PipelineError>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(
                rounds
                    .into_iter()
                    .map(|r| r.map(|events| events.into_iter().map(|(a, b)| (a.to_string(), b.to_string())).collect::<Vec<_>>()))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        })
    }

    fn ok(rounds: Vec<Vec<(&str, &str)>>) -> Arc<Self> {
        Self::new(rounds.into_iter().map(Ok).collect())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RolePipeline for Script {
    async fn run(&self, _task: &str, events: mpsc::Sender<RoleEvent>) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::Malformed("script exhausted".to_string())));
        for (role, text) in next? {
            events
                .send(RoleEvent::new(role, text))
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
        }
        Ok(())
    }
}

/// LLM that answers with queued texts
struct QueuedLlm {
    replies: Mutex<VecDeque<String>>,
}

impl QueuedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmClient for QueuedLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .map(CompletionResponse::text)
            .ok_or_else(|| LlmError::InvalidResponse("no more replies".to_string()))
    }
}

fn default_config() -> LoopConfig {
    let roster = RoleRoster::for_mode(PipelineMode::Roles);
    LoopConfig::from_roster(&roster, MarkupStyle::Plain, RetryPolicy::new(3, 2.0).without_jitter())
}

// =============================================================================
// Loop scenarios
// =============================================================================

#[tokio::test]
async fn test_two_tier_erp_converges_in_round_two() {
    let script = Script::ok(vec![
        vec![("WriterAgent", "# Two-Tier ERP\nDraft"), ("ReviewerAgent", "Score: 6/10")],
        vec![("WriterAgent", "# Two-Tier ERP\nBetter draft"), ("ReviewerAgent", "Score: 10/10")],
    ]);
    let session = Session::new("Two-Tier ERP", 10, vec![], 5).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), script.clone());

    let outcome = engine.run(None).await.unwrap();

    assert_eq!(outcome.state, LoopState::Converged);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.verified_score, 10);
    assert_eq!(script.calls(), 2);
}

#[tokio::test]
async fn test_single_round_budget_always_terminates() {
    for (score, expected) in [("Score: 9/10", LoopState::Converged), ("Score: 4/10", LoopState::Exhausted)] {
        let script = Script::ok(vec![vec![("WriterAgent", "Draft"), ("ScoreVerifierAgent", score)]]);
        let session = Session::new("Two-Tier ERP", 9, vec![], 1).unwrap();
        let mut engine = ConvergenceLoop::new(session, default_config(), script.clone());

        let outcome = engine.run(None).await.unwrap();
        assert_eq!(outcome.state, expected);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(script.calls(), 1);
    }
}

#[tokio::test]
async fn test_identical_tracked_output_stagnates_before_budget() {
    let round = vec![
        ("WriterAgent", "Same draft"),
        ("RefinementAgent", "Same refinement"),
        ("ReviewerAgent", "Score: 5/10"),
    ];
    let script = Script::ok(vec![round.clone(), round.clone(), round]);
    let session = Session::new("Two-Tier ERP", 10, vec![], 5).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), script.clone());

    let outcome = engine.run(None).await.unwrap();

    assert_eq!(outcome.state, LoopState::Stagnant);
    assert_eq!(outcome.rounds, 2);
    assert!(!outcome.target_reached());
}

#[tokio::test]
async fn test_one_changed_tracked_role_keeps_going() {
    let script = Script::ok(vec![
        vec![("WriterAgent", "Draft"), ("RefinementAgent", "Refined"), ("ReviewerAgent", "5/10")],
        vec![("WriterAgent", "Draft"), ("RefinementAgent", "Refined more"), ("ReviewerAgent", "5/10")],
        vec![("WriterAgent", "Draft"), ("RefinementAgent", "Refined more"), ("ReviewerAgent", "5/10")],
    ]);
    let session = Session::new("Two-Tier ERP", 10, vec![], 5).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), script);

    let outcome = engine.run(None).await.unwrap();
    assert_eq!(outcome.state, LoopState::Stagnant);
    assert_eq!(outcome.rounds, 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_loop() {
    let script = Script::new(vec![
        Err(PipelineError::Malformed("truncated".to_string())),
        Err(PipelineError::Malformed("truncated".to_string())),
        Err(PipelineError::Malformed("truncated".to_string())),
        Ok(vec![("ReviewerAgent", "10/10")]),
    ]);
    let session = Session::new("Two-Tier ERP", 10, vec![], 5).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), script.clone());

    let err = engine.run(None).await.unwrap_err();

    match err {
        ConvergenceError::PipelineFailed { round, attempts, source } => {
            assert_eq!(round, 1);
            assert_eq!(attempts, 3);
            assert!(source.to_string().contains("truncated"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(script.calls(), 3);
    assert!(matches!(engine.state(), LoopState::Failed { .. }));
}

#[tokio::test]
async fn test_snapshots_precede_each_decision() {
    let script = Script::ok(vec![
        vec![("WriterAgent", "line one"), ("ReviewerAgent", "3/10")],
        vec![("WriterAgent", "line one\nline two"), ("ReviewerAgent", "7/10")],
        vec![("WriterAgent", "line one\nline two\nline three"), ("ReviewerAgent", "8/10")],
    ]);
    let session = Session::new("Two-Tier ERP", 10, vec![], 3).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), script);

    let (tx, mut rx) = mpsc::channel(8);
    let outcome = engine.run(Some(tx)).await.unwrap();
    let mut snapshots = Vec::new();
    while let Some(s) = rx.recv().await {
        snapshots.push(s);
    }

    assert_eq!(snapshots.len(), 3);
    let rounds: Vec<u32> = snapshots.iter().map(|s| s.round).collect();
    assert_eq!(rounds, vec![1, 2, 3]);
    assert_eq!(snapshots[0].state, LoopState::Running { round: 2 });
    assert_eq!(snapshots[2].state, LoopState::Exhausted);
    assert_eq!(snapshots[1].highlights["WriterAgent"], "line one\n{+line two+}");
    assert_eq!(outcome.state, LoopState::Exhausted);
    assert_eq!(outcome.verified_score, 8);
}

#[tokio::test]
async fn test_terminal_results_have_every_role() {
    let script = Script::ok(vec![vec![("WriterAgent", "Draft"), ("ReviewerAgent", "Score: 10/10")]]);
    let session = Session::new("Two-Tier ERP", 10, vec![], 5).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), script);

    let outcome = engine.run(None).await.unwrap();

    assert_eq!(outcome.results.len(), 7);
    assert_eq!(outcome.text("WriterAgent"), Some("Draft"));
    assert_eq!(outcome.text("RefinementAgent"), Some("Content refined."));
    assert_eq!(outcome.text("ResearchAgent"), Some("No research results."));
    assert_eq!(outcome.text("ScoreVerifierAgent"), Some("Verified score: 10/10"));
    assert_eq!(outcome.text("FinalSummaryAgent"), Some("Summary and conclusion for Two-Tier ERP."));
}

// =============================================================================
// Real pipelines over a scripted LLM
// =============================================================================

#[tokio::test]
async fn test_round_robin_pipeline_end_to_end() {
    let llm = QueuedLlm::new(&[
        "Research notes",
        "# Two-Tier ERP\nDraft",
        "Facts check out",
        "# Two-Tier ERP\nRefined",
        "Score: 8/10",
        "Confirmed: 9/10",
        "Summary",
    ]);
    let roster = RoleRoster::for_mode(PipelineMode::Roles);
    let pipeline = Arc::new(LlmRolePipeline::new(
        llm,
        roster.roles.clone(),
        PromptContext::new("Two-Tier ERP", &[], 9),
        500,
    ));
    let session = Session::new("Two-Tier ERP", 9, vec![], 3).unwrap();
    let mut engine = ConvergenceLoop::new(session, default_config(), pipeline);

    let outcome = engine.run(None).await.unwrap();

    assert_eq!(outcome.state, LoopState::Converged);
    assert_eq!(outcome.verified_score, 9);
    assert_eq!(outcome.review_score, Some(8));

    let post = build_post(&outcome, &roster, "gpt-4o");
    assert_eq!(post.title, "Two-Tier ERP");
    assert_eq!(post.content, "# Two-Tier ERP\nRefined");
    assert_eq!(post.metadata["summary"], "Summary");
}

#[tokio::test]
async fn test_sectioned_pipeline_end_to_end_and_saved() {
    let llm = QueuedLlm::new(&[
        "Research: notes\nContent: # ERP\nDraft\nVerification: ok\nRefinement: # ERP Guide\nRefined\nReview: 7/10\nCitations: https://a.example",
    ]);
    let roster = RoleRoster::for_mode(PipelineMode::Sectioned);
    let pipeline = Arc::new(SectionedPipeline::new(llm, PromptContext::new("ERP", &[], 10), 800));
    let config = LoopConfig::from_roster(&roster, MarkupStyle::Html, RetryPolicy::default());
    let session = Session::new("ERP", 10, vec!["cloud".to_string()], 1).unwrap();
    let mut engine = ConvergenceLoop::new(session, config, pipeline);

    let outcome = engine.run(None).await.unwrap();
    assert_eq!(outcome.state, LoopState::Exhausted);
    assert_eq!(outcome.verified_score, 7);

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut store = PostStore::open(temp_dir.path().join("content.db")).unwrap();
    let id = store.save(&build_post(&outcome, &roster, "gpt-4o")).unwrap();
    let saved = store.get(id).unwrap().unwrap();

    assert_eq!(saved.title, "ERP Guide");
    assert_eq!(saved.score, 7);
    assert_eq!(saved.keywords, vec!["cloud".to_string()]);
    assert_eq!(saved.metadata["state"], "exhausted");
}
