//! Error taxonomy for agent operations.

use crate::core::types::{ProposalStatus, Stage};
use crate::io::patch::PatchError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("proposal {0} not found")]
    NotFound(String),

    #[error("proposal {id} is {status}; only pending proposals can be changed")]
    InvalidState { id: String, status: ProposalStatus },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("could not apply changes: {0}")]
    Patch(#[from] PatchError),

    #[error("validation failed at the {stage} stage:\n{output}")]
    ValidationFailed { stage: Stage, output: String },

    #[error("{0:#}")]
    Collaborator(#[from] anyhow::Error),
}

impl AgentError {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::NotFound(_) => "not_found",
            AgentError::InvalidState { .. } => "invalid_state",
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::Patch(PatchError::Conflict { .. }) => "apply_conflict",
            AgentError::Patch(_) => "apply_failed",
            AgentError::ValidationFailed { .. } => "validation_failed",
            AgentError::Collaborator(_) => "collaborator_failure",
        }
    }
}
