//! Role pipeline error types

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// Errors from one role-pipeline invocation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Role {role} failed: {source}")]
    Llm {
        role: String,
        #[source]
        source: LlmError,
    },

    #[error("Malformed pipeline output: {0}")]
    Malformed(String),

    #[error("Template error for {role}: {message}")]
    Template { role: String, message: String },

    #[error("Role event channel closed")]
    ChannelClosed,
}

impl PipelineError {
    /// Whether another attempt of the whole invocation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Llm { source, .. } => source.is_retryable(),
            PipelineError::Malformed(_) => true,
            PipelineError::Template { .. } => false,
            PipelineError::ChannelClosed => false,
        }
    }

    /// Minimum wait the provider asked for before retrying
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::Llm { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Role the failure is attributed to, if any
    pub fn role(&self) -> Option<&str> {
        match self {
            PipelineError::Llm { role, .. } | PipelineError::Template { role, .. } => Some(role),
            _ => None,
        }
    }
}
