//! Proposal status transitions.
//!
//! Allowed edges:
//! - `pending -> approved` (human approval, before apply starts)
//! - `pending -> rejected` (human rejection)
//! - `approved -> applied` (pull request opened)
//! - `approved -> rejected` (apply, validation, or publish failure)
//!
//! `applied` and `rejected` are terminal; nothing ever returns to `pending`.

use crate::core::types::ProposalStatus;

impl ProposalStatus {
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::{Applied, Approved, Pending, Rejected};
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Applied) | (Approved, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProposalStatus::Applied | ProposalStatus::Rejected)
    }
}
