//! Turning a finished loop into a storable post

use poststore::NewPost;
use serde_json::json;
use tracing::debug;

use crate::convergence::Outcome;
use crate::roles::RoleRoster;

/// Title of a markdown article: its first heading, or `fallback` when there is none
pub fn derive_title(content: &str, fallback: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .find(|title| !title.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Build the post for an outcome
///
/// The content role's text is the article. The verified score is the primary
/// score and the review score, when there was one, the secondary.
pub fn build_post(outcome: &Outcome, roster: &RoleRoster, model: &str) -> NewPost {
    debug!(session_id = %outcome.session_id, content_role = %roster.content_role, "build_post: called");
    let content = outcome.text(&roster.content_role).unwrap_or_default();
    let summary = roster.summary_role.as_deref().and_then(|role| outcome.text(role));

    NewPost {
        topic: outcome.topic.clone(),
        title: derive_title(content, &outcome.topic),
        content: content.to_string(),
        keywords: outcome.keywords.clone(),
        score: outcome.verified_score,
        secondary_score: outcome.review_score,
        metadata: json!({
            "session_id": outcome.session_id.to_string(),
            "state": outcome.state.name(),
            "target_reached": outcome.target_reached(),
            "rounds": outcome.rounds,
            "target_score": outcome.target_score,
            "model": model,
            "summary": summary,
        }),
    }
}
