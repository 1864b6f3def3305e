//! Session and round records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConvergenceError;
use crate::score::MAX_SCORE;

/// One execution of the role pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based, unique and increasing within a session
    pub index: u32,
    pub task: String,
    /// Non-empty outputs produced in this round only
    pub outputs: BTreeMap<String, String>,
    /// Verified score after this round
    pub score: u8,
    /// Whether `score` was read from this round's text rather than carried over
    pub score_parsed: bool,
    pub review_score: Option<u8>,
}

/// The run for one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub topic: String,
    pub target_score: u8,
    pub keywords: Vec<String>,
    pub max_rounds: u32,
    /// Rounds completed so far
    pub round: u32,
    /// Latest non-empty text per role
    pub results: BTreeMap<String, String>,
    pub verified_score: u8,
    pub review_score: Option<u8>,
    pub rounds: Vec<Round>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session, rejecting an empty topic, a target above 10 or zero rounds
    pub fn new(
        topic: impl Into<String>,
        target_score: u8,
        keywords: Vec<String>,
        max_rounds: u32,
    ) -> Result<Self, ConvergenceError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(ConvergenceError::InvalidSession("topic is empty".to_string()));
        }
        if target_score > MAX_SCORE {
            return Err(ConvergenceError::InvalidSession(format!(
                "target score {} is above {}",
                target_score, MAX_SCORE
            )));
        }
        if max_rounds == 0 {
            return Err(ConvergenceError::InvalidSession("max rounds must be at least 1".to_string()));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            topic,
            target_score,
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            max_rounds,
            round: 0,
            results: BTreeMap::new(),
            verified_score: 0,
            review_score: None,
            rounds: Vec::new(),
            started_at: Utc::now(),
        })
    }

    /// Merge one round's outputs, keeping prior text for roles that produced nothing
    pub fn absorb(&mut self, outputs: &BTreeMap<String, String>) {
        for (role, text) in outputs {
            if !text.trim().is_empty() {
                self.results.insert(role.clone(), text.clone());
            }
        }
    }

    pub fn text(&self, role: &str) -> Option<&str> {
        self.results.get(role).map(String::as_str)
    }

    pub fn target_met(&self) -> bool {
        self.verified_score >= self.target_score
    }
}
