//! Convergence loop
//!
//! Runs rounds of the role pipeline for one topic until the verified score
//! reaches the target, the round budget runs out, or the tracked roles stop
//! changing. Every round yields a [`Snapshot`] before the loop decides what to
//! do next.
//!
//! ```text
//! Idle -> Running(1) -> Running(2) -> ... -> Converged | Exhausted | Stagnant | Failed
//! ```

use thiserror::Error;

use crate::highlight::{Markup, MarkupStyle};
use crate::pipeline::PipelineError;
use crate::retry::RetryPolicy;
use crate::roles::{RoleDefinition, RoleRoster};

mod engine;
mod session;
mod snapshot;

pub use engine::{ConvergenceLoop, round_task};
pub use session::{Round, Session};
pub use snapshot::{LoopState, Outcome, Snapshot};

/// Errors surfaced by the convergence loop
#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Round {round} failed after {attempts} attempt(s): {source}")]
    PipelineFailed {
        round: u32,
        attempts: u32,
        #[source]
        source: PipelineError,
    },

    #[error("Cancelled after round {round}")]
    Cancelled { round: u32 },
}

/// How the loop treats one role
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSlot {
    pub name: String,
    /// Compared for stagnation and highlighted in snapshots
    pub tracked: bool,
    pub markup: Markup,
    /// Handlebars text for a role that never produced output
    pub placeholder: String,
}

impl RoleSlot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracked: false,
            markup: Markup::Plain,
            placeholder: String::new(),
        }
    }

    pub fn tracked(mut self, markup: Markup) -> Self {
        self.tracked = true;
        self.markup = markup;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn from_definition(role: &RoleDefinition, style: MarkupStyle) -> Self {
        Self {
            name: role.name.clone(),
            tracked: role.tracked,
            markup: Markup::new(style, role.highlight_color.as_deref()),
            placeholder: role.placeholder.clone(),
        }
    }
}

/// Loop behaviour independent of the topic
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub slots: Vec<RoleSlot>,
    /// Role whose score decides convergence
    pub score_role: String,
    /// Preliminary score, and fallback when the score role has none
    pub review_role: Option<String>,
    /// Retries for one pipeline invocation
    pub retry: RetryPolicy,
}

impl LoopConfig {
    pub fn new(slots: Vec<RoleSlot>, score_role: impl Into<String>) -> Self {
        Self {
            slots,
            score_role: score_role.into(),
            review_role: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_review_role(mut self, role: impl Into<String>) -> Self {
        self.review_role = Some(role.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_roster(roster: &RoleRoster, style: MarkupStyle, retry: RetryPolicy) -> Self {
        Self {
            slots: roster
                .roles
                .iter()
                .map(|r| RoleSlot::from_definition(r, style))
                .collect(),
            score_role: roster.score_role.clone(),
            review_role: roster.review_role.clone(),
            retry,
        }
    }

    /// Names of tracked roles
    pub fn tracked_roles(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.tracked)
            .map(|s| s.name.as_str())
            .collect()
    }
}
