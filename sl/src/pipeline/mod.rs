//! Role pipelines
//!
//! A role pipeline turns one round's task text into a stream of
//! [`RoleEvent`]s, one per role output. Dropping the sender when `run`
//! returns is the end-of-round signal. The convergence loop neither knows nor
//! cares how many roles exist or in which order they run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::llm::LlmClient;
use crate::roles::{PipelineMode, PromptContext, RoleRoster};
use crate::search::SearchProvider;

mod error;
mod llm;
mod sectioned;

pub use error::PipelineError;
pub use llm::LlmRolePipeline;
pub use sectioned::{SectionedPipeline, parse_sections};

/// One role's output within a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEvent {
    pub role: String,
    pub text: String,
}

impl RoleEvent {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }
}

/// Produces role outputs for one round
#[async_trait]
pub trait RolePipeline: Send + Sync {
    /// Run the roles for `task`, sending each output on `events` as it is produced
    async fn run(&self, task: &str, events: mpsc::Sender<RoleEvent>) -> Result<(), PipelineError>;
}

/// Build the pipeline for a mode
///
/// Search only applies to the round-robin pipeline, where individual roles opt in.
pub fn build_pipeline(
    mode: PipelineMode,
    llm: Arc<dyn LlmClient>,
    roster: &RoleRoster,
    context: PromptContext,
    max_tokens: u32,
    search: Option<(Arc<dyn SearchProvider>, usize)>,
) -> Arc<dyn RolePipeline> {
    debug!(?mode, has_search = search.is_some(), "build_pipeline: called");
    match mode {
        PipelineMode::Roles => {
            let pipeline = LlmRolePipeline::new(llm, roster.roles.clone(), context, max_tokens);
            match search {
                Some((provider, max_results)) => Arc::new(pipeline.with_search(provider, max_results)),
                None => Arc::new(pipeline),
            }
        }
        PipelineMode::Sectioned => Arc::new(SectionedPipeline::new(llm, context, max_tokens)),
    }
}
