//! In-memory proposal store for one repository.
//!
//! All status changes go through [`ProposalStatus::can_transition_to`]. The
//! map lock is a plain `std::sync::Mutex` and is never held across an await.
//! Analyses reserve their issue with [`ProposalStore::claim_issue`] so one
//! issue never gets two pending proposals.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::core::types::{FixProposal, ProposalStatus};
use crate::error::AgentError;

#[derive(Debug, Default)]
struct Entries {
    proposals: HashMap<String, FixProposal>,
    /// Issues with an analysis currently running.
    in_flight: HashSet<u64>,
}

#[derive(Debug, Default)]
pub struct ProposalStore {
    entries: Mutex<Entries>,
}

/// Outcome of [`ProposalStore::claim_issue`].
#[derive(Debug)]
pub enum IssueClaim<'a> {
    Claimed(ClaimGuard<'a>),
    /// A pending proposal already covers the issue.
    Pending(FixProposal),
    /// Another analysis of the issue is running.
    InFlight,
}

/// Reservation on one issue; released on drop.
#[derive(Debug)]
pub struct ClaimGuard<'a> {
    store: &'a ProposalStore,
    issue_number: u64,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.store.lock().in_flight.remove(&self.issue_number);
    }
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, proposal: FixProposal) {
        debug!(id = %proposal.id, issue = proposal.issue_number, "storing proposal");
        self.lock().proposals.insert(proposal.id.clone(), proposal);
    }

    pub fn remove(&self, id: &str) -> Option<FixProposal> {
        self.lock().proposals.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<FixProposal> {
        self.lock().proposals.get(id).cloned()
    }

    /// Pending proposals, oldest first.
    pub fn list_pending(&self) -> Vec<FixProposal> {
        let mut pending: Vec<FixProposal> = self
            .lock()
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending
    }

    /// Reserve `issue_number` for analysis unless it is pending or already claimed.
    ///
    /// The pending check and the reservation happen under one lock acquisition.
    pub fn claim_issue(&self, issue_number: u64) -> IssueClaim<'_> {
        let mut entries = self.lock();
        if let Some(existing) = entries
            .proposals
            .values()
            .find(|p| p.issue_number == issue_number && p.status == ProposalStatus::Pending)
        {
            return IssueClaim::Pending(existing.clone());
        }
        if !entries.in_flight.insert(issue_number) {
            return IssueClaim::InFlight;
        }
        IssueClaim::Claimed(ClaimGuard {
            store: self,
            issue_number,
        })
    }

    /// Move a pending proposal to approved under a single lock acquisition.
    ///
    /// Of two concurrent callers for the same id, exactly one succeeds.
    pub fn begin_approval(&self, id: &str) -> Result<FixProposal, AgentError> {
        self.transition(id, ProposalStatus::Approved, |_| {})
    }

    /// Apply a lifecycle transition, rejecting edges the state machine does not allow.
    pub fn set_status(&self, id: &str, next: ProposalStatus) -> Result<FixProposal, AgentError> {
        self.transition(id, next, |_| {})
    }

    /// Mark an approved proposal applied and record its pull request.
    pub fn mark_applied(&self, id: &str, pr_url: &str) -> Result<FixProposal, AgentError> {
        self.transition(id, ProposalStatus::Applied, |p| {
            p.pr_url = Some(pr_url.to_string());
        })
    }

    pub fn record_branch(&self, id: &str, branch: &str) {
        if let Some(p) = self.lock().proposals.get_mut(id) {
            p.branch = Some(branch.to_string());
        }
    }

    /// Reject a pending proposal on behalf of a human and drop it from the store.
    pub fn reject(&self, id: &str) -> Result<FixProposal, AgentError> {
        let mut entries = self.lock();
        let current = entries
            .proposals
            .get(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        // Approved proposals belong to a running pipeline.
        if current.status != ProposalStatus::Pending {
            return Err(AgentError::InvalidState {
                id: id.to_string(),
                status: current.status,
            });
        }
        let mut removed = entries
            .proposals
            .remove(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        removed.status = ProposalStatus::Rejected;
        Ok(removed)
    }

    fn transition(
        &self,
        id: &str,
        next: ProposalStatus,
        update: impl FnOnce(&mut FixProposal),
    ) -> Result<FixProposal, AgentError> {
        let mut entries = self.lock();
        let proposal = entries
            .proposals
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        if !proposal.status.can_transition_to(next) {
            return Err(AgentError::InvalidState {
                id: id.to_string(),
                status: proposal.status,
            });
        }
        debug!(id, from = %proposal.status, to = %next, "proposal transition");
        proposal.status = next;
        update(proposal);
        Ok(proposal.clone())
    }
}
