//! Role catalog
//!
//! A role is a named responsibility in the content pipeline. Roles are data:
//! a name, a handlebars system prompt, a placeholder used when the role never
//! produced output, and flags for change tracking and search grounding.
//!
//! Templates are rendered with [`PromptContext`] (prompts) or
//! [`PlaceholderContext`] (placeholders).

pub mod embedded;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::highlight::DEFAULT_HTML_COLOR;

pub const RESEARCH_AGENT: &str = "ResearchAgent";
pub const WRITER_AGENT: &str = "WriterAgent";
pub const VERIFICATION_AGENT: &str = "VerificationAgent";
pub const REFINEMENT_AGENT: &str = "RefinementAgent";
pub const REVIEWER_AGENT: &str = "ReviewerAgent";
pub const SCORE_VERIFIER_AGENT: &str = "ScoreVerifierAgent";
pub const FINAL_SUMMARY_AGENT: &str = "FinalSummaryAgent";

/// Section names produced by the single-call pipeline
pub const SECTIONS: [&str; 6] = ["Research", "Content", "Verification", "Refinement", "Review", "Citations"];

/// Definition of one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Role identifier, also the key in every result mapping
    pub name: String,

    /// Handlebars system prompt (unused in sectioned mode)
    #[serde(default)]
    pub prompt: String,

    /// Handlebars text used when the role produced nothing by the end
    #[serde(default)]
    pub placeholder: String,

    /// Compared across rounds for stagnation and highlighted in snapshots
    #[serde(default)]
    pub tracked: bool,

    /// Background colour for inserted lines in HTML markup
    #[serde(default, rename = "highlight-color")]
    pub highlight_color: Option<String>,

    /// Prepend web search results to this role's prompt
    #[serde(default, rename = "uses-search")]
    pub uses_search: bool,
}

impl RoleDefinition {
    /// A bare role with a prompt and placeholder
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, placeholder: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            placeholder: placeholder.into(),
            tracked: false,
            highlight_color: None,
            uses_search: false,
        }
    }

    /// Mark the role as tracked, highlighting insertions with `color`
    pub fn tracked(mut self, color: &str) -> Self {
        self.tracked = true;
        self.highlight_color = Some(color.to_string());
        self
    }

    /// Ground the role in search results
    pub fn with_search(mut self) -> Self {
        self.uses_search = true;
        self
    }
}

/// Which pipeline shape produces the role outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// One completion per role, round-robin
    #[default]
    Roles,
    /// One completion per round, split into sections
    Sectioned,
}

/// The roles of one pipeline plus which of them carry scores and content
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRoster {
    pub roles: Vec<RoleDefinition>,
    /// Role whose score is authoritative for convergence
    pub score_role: String,
    /// Role giving a preliminary score, also the fallback for the verified one
    pub review_role: Option<String>,
    /// Role whose text is the publishable article
    pub content_role: String,
    /// Role whose text summarises the article
    pub summary_role: Option<String>,
}

impl RoleRoster {
    /// Default roster for a pipeline mode
    pub fn for_mode(mode: PipelineMode) -> Self {
        debug!(?mode, "RoleRoster::for_mode: called");
        match mode {
            PipelineMode::Roles => Self {
                roles: default_roles(),
                score_role: SCORE_VERIFIER_AGENT.to_string(),
                review_role: Some(REVIEWER_AGENT.to_string()),
                content_role: REFINEMENT_AGENT.to_string(),
                summary_role: Some(FINAL_SUMMARY_AGENT.to_string()),
            },
            PipelineMode::Sectioned => Self {
                roles: sectioned_roles(),
                score_role: "Review".to_string(),
                review_role: None,
                content_role: "Refinement".to_string(),
                summary_role: None,
            },
        }
    }

    /// Role names in pipeline order
    pub fn names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    /// Look up a role by name
    pub fn get(&self, name: &str) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.name == name)
    }
}

/// The seven-role content team, in run order
pub fn default_roles() -> Vec<RoleDefinition> {
    vec![
        RoleDefinition::new(RESEARCH_AGENT, embedded::RESEARCH, "No research results.").with_search(),
        RoleDefinition::new(WRITER_AGENT, embedded::WRITER, "Sample content for {{topic}}.").tracked(DEFAULT_HTML_COLOR),
        RoleDefinition::new(VERIFICATION_AGENT, embedded::VERIFICATION, "Content verified."),
        RoleDefinition::new(REFINEMENT_AGENT, embedded::REFINEMENT, "Content refined.").tracked("#fce0d4"),
        RoleDefinition::new(REVIEWER_AGENT, embedded::REVIEWER, "Score: {{score}}/10"),
        RoleDefinition::new(
            SCORE_VERIFIER_AGENT,
            embedded::SCORE_VERIFIER,
            "Verified score: {{verified_score}}/10",
        ),
        RoleDefinition::new(FINAL_SUMMARY_AGENT, embedded::SUMMARY, "Summary and conclusion for {{topic}}."),
    ]
}

/// Sections of the single-call pipeline, as roles
pub fn sectioned_roles() -> Vec<RoleDefinition> {
    vec![
        RoleDefinition::new("Research", "", "No research generated."),
        RoleDefinition::new("Content", "", "No content generated.").tracked(DEFAULT_HTML_COLOR),
        RoleDefinition::new("Verification", "", "Not verified."),
        RoleDefinition::new("Refinement", "", "No refinement generated.").tracked("#fce0d4"),
        RoleDefinition::new("Review", "", "Score: {{verified_score}}/10"),
        RoleDefinition::new("Citations", "", "No citations provided."),
    ]
}

/// Variables available to role prompts
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub topic: String,
    /// Comma-joined keywords, or a note that there are none
    pub keywords: String,
    pub target_score: u8,
    /// Formatted search brief, when the role uses search
    pub search_results: Option<String>,
}

impl PromptContext {
    pub fn new(topic: &str, keywords: &[String], target_score: u8) -> Self {
        Self {
            topic: topic.to_string(),
            keywords: keyword_text(keywords),
            target_score,
            search_results: None,
        }
    }
}

/// Variables available to placeholders
#[derive(Debug, Clone, Serialize)]
pub struct PlaceholderContext {
    pub topic: String,
    pub score: u8,
    pub verified_score: u8,
    pub target_score: u8,
}

/// Keywords as prompt text
pub fn keyword_text(keywords: &[String]) -> String {
    if keywords.is_empty() {
        "no specific keywords".to_string()
    } else {
        keywords.join(", ")
    }
}

/// Handlebars instance for prompt text: no HTML escaping, lenient on missing vars
pub fn template_engine() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb
}
