//! Single-call pipeline: one completion split into sections

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use handlebars::Handlebars;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{PipelineError, RoleEvent, RolePipeline};
use crate::llm::{CompletionRequest, LlmClient};
use crate::roles::{PromptContext, embedded, template_engine};

/// Section header at the start of a line, tolerating markdown bold and headings
static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:#+[ \t]*)?\**[ \t]*(Research|Content|Verification|Refinement|Review|Citations)[ \t]*\**[ \t]*:\**")
        .expect("valid regex")
});

/// Split a sectioned answer into `(section, text)` pairs in order of appearance
///
/// Text before the first header is ignored. Citations are normalised to one
/// non-empty line per source.
pub fn parse_sections(text: &str) -> Vec<(String, String)> {
    debug!(len = text.len(), "parse_sections: called");
    let headers: Vec<_> = SECTION_HEADER
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(0)?, caps.get(1)?.as_str().to_string())))
        .collect();

    headers
        .iter()
        .enumerate()
        .map(|(i, (whole, name))| {
            let end = headers.get(i + 1).map_or(text.len(), |(next, _)| next.start());
            let body = text[whole.end()..end].trim();
            let body = if name == "Citations" {
                body.lines()
                    .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                body.to_string()
            };
            (name.clone(), body)
        })
        .collect()
}

/// Asks for every section in a single completion
pub struct SectionedPipeline {
    llm: Arc<dyn LlmClient>,
    context: PromptContext,
    max_tokens: u32,
    handlebars: Handlebars<'static>,
}

impl SectionedPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, context: PromptContext, max_tokens: u32) -> Self {
        debug!(%max_tokens, "SectionedPipeline::new: called");
        Self {
            llm,
            context,
            max_tokens,
            handlebars: template_engine(),
        }
    }
}

#[async_trait]
impl RolePipeline for SectionedPipeline {
    async fn run(&self, task: &str, events: mpsc::Sender<RoleEvent>) -> Result<(), PipelineError> {
        debug!("SectionedPipeline::run: called");
        let system_prompt = self
            .handlebars
            .render_template(embedded::SECTIONED, &self.context)
            .map_err(|e| PipelineError::Template {
                role: "sectioned".to_string(),
                message: e.to_string(),
            })?;

        let response = self
            .llm
            .complete(CompletionRequest::single(system_prompt, task, self.max_tokens))
            .await
            .map_err(|source| PipelineError::Llm {
                role: "sectioned".to_string(),
                source,
            })?;

        let sections = parse_sections(response.text_or_empty());
        if sections.is_empty() {
            return Err(PipelineError::Malformed("answer contained no recognised sections".to_string()));
        }
        info!(sections = sections.len(), "Sectioned answer parsed");

        for (name, body) in sections {
            events
                .send(RoleEvent::new(name, body))
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
        }
        Ok(())
    }
}
