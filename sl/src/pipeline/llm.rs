//! Round-robin pipeline: one LLM completion per role

use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{PipelineError, RoleEvent, RolePipeline};
use crate::llm::{CompletionRequest, LlmClient};
use crate::roles::{PromptContext, RoleDefinition, template_engine};
use crate::search::{SearchProvider, format_brief};

/// Runs each role in turn against the LLM
///
/// Every role sees the round task followed by the outputs of the roles that
/// ran before it in the same round. Calls are independent: no provider-side
/// conversation is kept between roles or rounds.
pub struct LlmRolePipeline {
    llm: Arc<dyn LlmClient>,
    roles: Vec<RoleDefinition>,
    context: PromptContext,
    max_tokens: u32,
    search: Option<Arc<dyn SearchProvider>>,
    max_search_results: usize,
    handlebars: Handlebars<'static>,
}

impl LlmRolePipeline {
    pub fn new(llm: Arc<dyn LlmClient>, roles: Vec<RoleDefinition>, context: PromptContext, max_tokens: u32) -> Self {
        debug!(role_count = roles.len(), %max_tokens, "LlmRolePipeline::new: called");
        Self {
            llm,
            roles,
            context,
            max_tokens,
            search: None,
            max_search_results: 5,
            handlebars: template_engine(),
        }
    }

    /// Ground `uses-search` roles in results from `provider`
    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        self.search = Some(provider);
        self.max_search_results = max_results;
        self
    }

    /// Search results brief for a role, if it wants one and search works
    async fn search_brief(&self, role: &RoleDefinition) -> Option<String> {
        let provider = self.search.as_ref().filter(|_| role.uses_search)?;
        let query = &self.context.topic;
        debug!(role = %role.name, %query, "search_brief: searching");
        match provider.search(query, self.max_search_results).await {
            Ok(hits) if hits.is_empty() => {
                debug!(role = %role.name, "search_brief: no hits");
                None
            }
            Ok(hits) => Some(format_brief(&hits)),
            Err(e) => {
                warn!(role = %role.name, error = %e, "Search failed, continuing without results");
                None
            }
        }
    }

    fn render_prompt(&self, role: &RoleDefinition, context: &PromptContext) -> Result<String, PipelineError> {
        self.handlebars
            .render_template(&role.prompt, context)
            .map_err(|e| PipelineError::Template {
                role: role.name.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl RolePipeline for LlmRolePipeline {
    async fn run(&self, task: &str, events: mpsc::Sender<RoleEvent>) -> Result<(), PipelineError> {
        debug!(role_count = self.roles.len(), "LlmRolePipeline::run: called");
        let mut transcript = String::new();

        for role in &self.roles {
            let mut context = self.context.clone();
            context.search_results = self.search_brief(role).await;
            let system_prompt = self.render_prompt(role, &context)?;

            let user = if transcript.is_empty() {
                task.to_string()
            } else {
                format!("{}\n\nOutputs so far this round:\n\n{}", task, transcript.trim_end())
            };

            let response = self
                .llm
                .complete(CompletionRequest::single(system_prompt, user, self.max_tokens))
                .await
                .map_err(|source| PipelineError::Llm {
                    role: role.name.clone(),
                    source,
                })?;

            let text = response.text_or_empty().trim().to_string();
            info!(role = %role.name, chars = text.len(), tokens = response.usage.total(), "Role finished");
            transcript.push_str(&format!("[{}]\n{}\n\n", role.name, text));

            events
                .send(RoleEvent::new(&role.name, text))
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
        }

        Ok(())
    }
}
