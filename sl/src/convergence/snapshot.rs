//! Loop states and what the loop hands to observers

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Convergence loop state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running { round: u32 },
    /// Verified score reached the target
    Converged,
    /// Max rounds spent below target
    Exhausted,
    /// Tracked roles stopped changing
    Stagnant,
    /// Pipeline retries exhausted
    Failed { error: String },
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Converged | LoopState::Exhausted | LoopState::Stagnant | LoopState::Failed { .. }
        )
    }

    /// Only Converged means the target score was met
    pub fn target_reached(&self) -> bool {
        matches!(self, LoopState::Converged)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Running { .. } => "running",
            LoopState::Converged => "converged",
            LoopState::Exhausted => "exhausted",
            LoopState::Stagnant => "stagnant",
            LoopState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Running { round } => write!(f, "running (round {})", round),
            LoopState::Failed { error } => write!(f, "failed: {}", error),
            other => f.write_str(other.name()),
        }
    }
}

/// Progress emitted once per round, before the loop decides whether to continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: Uuid,
    pub topic: String,
    pub round: u32,
    pub max_rounds: u32,
    /// State after this round: Running(next) or terminal
    pub state: LoopState,
    pub verified_score: u8,
    pub review_score: Option<u8>,
    pub target_score: u8,
    /// Accumulated text per role
    pub results: BTreeMap<String, String>,
    /// Tracked roles rendered against the previous round
    pub highlights: BTreeMap<String, String>,
}

/// Final result of a loop that did not fail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub session_id: Uuid,
    pub topic: String,
    pub keywords: Vec<String>,
    pub state: LoopState,
    pub rounds: u32,
    pub target_score: u8,
    pub verified_score: u8,
    pub review_score: Option<u8>,
    /// Text per role, placeholders filled in for roles that never produced output
    pub results: BTreeMap<String, String>,
}

impl Outcome {
    pub fn target_reached(&self) -> bool {
        self.state.target_reached()
    }

    pub fn text(&self, role: &str) -> Option<&str> {
        self.results.get(role).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!LoopState::Idle.is_terminal());
        assert!(!LoopState::Running { round: 2 }.is_terminal());
        assert!(LoopState::Converged.is_terminal());
        assert!(LoopState::Exhausted.is_terminal());
        assert!(LoopState::Stagnant.is_terminal());
        assert!(LoopState::Failed { error: "x".into() }.is_terminal());

        assert!(LoopState::Converged.target_reached());
        assert!(!LoopState::Stagnant.target_reached());
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(LoopState::Running { round: 3 }.to_string(), "running (round 3)");
        assert_eq!(LoopState::Exhausted.to_string(), "exhausted");

        let json = serde_json::to_value(LoopState::Running { round: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running", "round": 2}));
        let back: LoopState = serde_json::from_value(serde_json::json!({"state": "stagnant"})).unwrap();
        assert_eq!(back, LoopState::Stagnant);
    }
}
