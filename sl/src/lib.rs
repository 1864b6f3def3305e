//! Scoreloop - multi-role content refinement loop
//!
//! A small team of text-generation roles (research, writing, fact-checking,
//! refinement, scoring) iterates on one piece of content until a verified
//! score reaches the target, the round budget is spent, or the output stops
//! changing.
//!
//! # Modules
//!
//! - [`score`] - Score extraction from free-form text
//! - [`highlight`] - Line-level change highlighting between rounds
//! - [`retry`] - Exponential-backoff retries
//! - [`convergence`] - The convergence loop state machine
//! - [`pipeline`] - Role pipelines producing per-role output
//! - [`roles`] - Role catalog and prompt templates
//! - [`llm`] - LLM client trait and OpenAI implementation
//! - [`search`] - Web search collaborator
//! - [`publish`] - Turning outcomes into stored posts
//! - [`present`] - Terminal rendering
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod convergence;
pub mod highlight;
pub mod llm;
pub mod pipeline;
pub mod present;
pub mod publish;
pub mod retry;
pub mod roles;
pub mod score;
pub mod search;

// Re-export commonly used types
pub use config::{Config, ConfigError, LlmConfig};
pub use convergence::{ConvergenceError, ConvergenceLoop, LoopConfig, LoopState, Outcome, RoleSlot, Session, Snapshot};
pub use highlight::{Markup, MarkupStyle, highlight, highlight_with};
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, OpenAIClient, create_client};
pub use pipeline::{LlmRolePipeline, PipelineError, RoleEvent, RolePipeline, SectionedPipeline, build_pipeline};
pub use retry::{RetryError, RetryPolicy, with_retries};
pub use roles::{PipelineMode, RoleDefinition, RoleRoster};
pub use score::{ScoreReading, clamp_score, extract_score, read_score, score_or};
