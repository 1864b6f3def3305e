//! Presentation of snapshots, outcomes and stored posts

use colored::Colorize;
use poststore::Post;
use tracing::debug;

use crate::cli::OutputFormat;
use crate::convergence::{Outcome, Snapshot};

/// Renders loop output for the terminal
///
/// Role sections appear in `order`; when `selected` is non-empty only those
/// roles are shown. Tracked roles are shown with their change highlighting.
pub struct Presenter {
    format: OutputFormat,
    order: Vec<String>,
    selected: Vec<String>,
}

impl Presenter {
    pub fn new(format: OutputFormat, order: Vec<String>) -> Self {
        Self {
            format,
            order,
            selected: Vec::new(),
        }
    }

    /// Show only these roles
    pub fn with_selected(mut self, roles: Vec<String>) -> Self {
        self.selected = roles;
        self
    }

    fn visible_roles<'a>(&'a self, present: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
        let mut roles: Vec<&str> = self.order.iter().map(String::as_str).collect();
        for extra in present {
            if !roles.contains(&extra.as_str()) {
                roles.push(extra.as_str());
            }
        }
        roles
            .into_iter()
            .filter(|r| self.selected.is_empty() || self.selected.iter().any(|s| s == r))
            .collect()
    }

    pub fn render_snapshot(&self, snapshot: &Snapshot) -> String {
        debug!(round = snapshot.round, format = %self.format, "render_snapshot: called");
        match self.format {
            OutputFormat::Json => to_json_line(snapshot),
            OutputFormat::Text => {
                let mut out = format!(
                    "{} {}\n{}\n",
                    format!("Round {}/{}", snapshot.round, snapshot.max_rounds).bright_cyan().bold(),
                    format!("[{}]", snapshot.state).dimmed(),
                    score_line(snapshot.verified_score, snapshot.review_score, snapshot.target_score),
                );
                for role in self.visible_roles(snapshot.results.keys()) {
                    let text = snapshot.highlights.get(role).or_else(|| snapshot.results.get(role));
                    if let Some(text) = text {
                        out.push_str(&format!("\n{}\n{}\n", role.yellow().bold(), text.trim_end()));
                    }
                }
                out
            }
        }
    }

    pub fn render_outcome(&self, outcome: &Outcome) -> String {
        debug!(state = %outcome.state, "render_outcome: called");
        match self.format {
            OutputFormat::Json => to_json_line(outcome),
            OutputFormat::Text => {
                let verdict = if outcome.target_reached() {
                    format!("Target reached after {} round(s)", outcome.rounds).green().bold()
                } else {
                    format!(
                        "Target not reached ({} after {} round(s))",
                        outcome.state, outcome.rounds
                    )
                    .yellow()
                    .bold()
                };
                format!(
                    "{}\n{}\n",
                    verdict,
                    score_line(outcome.verified_score, outcome.review_score, outcome.target_score)
                )
            }
        }
    }

    pub fn render_post(&self, post: &Post) -> String {
        match self.format {
            OutputFormat::Json => to_json_line(post),
            OutputFormat::Text => {
                let mut out = format!("{} {}\n", format!("#{}", post.id).dimmed(), post.title.bright_cyan().bold());
                out.push_str(&format!("Topic: {}\n", post.topic));
                if !post.keywords.is_empty() {
                    out.push_str(&format!("Keywords: {}\n", post.keywords.join(", ")));
                }
                out.push_str(&format!("Score: {}/10", post.score));
                if let Some(secondary) = post.secondary_score {
                    out.push_str(&format!(" (review {}/10)", secondary));
                }
                out.push_str(&format!("\n\n{}\n", post.content.trim_end()));
                out
            }
        }
    }

    pub fn render_posts(&self, posts: &[Post]) -> String {
        match self.format {
            OutputFormat::Json => posts.iter().map(to_json_line).collect::<Vec<_>>().join("\n"),
            OutputFormat::Text if posts.is_empty() => "No posts saved yet.".dimmed().to_string(),
            OutputFormat::Text => posts
                .iter()
                .map(|p| {
                    let created = chrono::DateTime::from_timestamp_millis(p.created_at)
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    format!("{:>5}  {:>2}/10  {}  {}", p.id, p.score, created.dimmed(), p.title)
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn score_line(verified: u8, review: Option<u8>, target: u8) -> String {
    match review {
        Some(review) => format!("Verified score: {}/10 (review {}/10, target {})", verified, review, target),
        None => format!("Verified score: {}/10 (target {})", verified, target),
    }
}

fn to_json_line<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}
