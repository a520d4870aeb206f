//! Shared deterministic types for the fix pipeline.
//!
//! These types define stable contracts between the pipeline stages and the
//! HTTP surface. Field names serialize in camelCase.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open/closed state of a tracker issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// Immutable snapshot of a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_login: String,
}

/// One literal find-and-replace, or a file creation when `original_code` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub file_path: String,
    #[serde(default)]
    pub original_code: String,
    pub new_code: String,
    #[serde(default)]
    pub explanation: String,
}

impl CodeChange {
    /// True when the change writes a whole file instead of replacing a snippet.
    pub fn creates_file(&self) -> bool {
        self.original_code.is_empty()
    }
}

/// Lifecycle status of a fix proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl ProposalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Applied => "applied",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate fix for one issue, awaiting human approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixProposal {
    pub id: String,
    pub issue_number: u64,
    pub title: String,
    pub description: String,
    pub code_changes: Vec<CodeChange>,
    /// Model confidence, clamped to 0..=100.
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    /// Branch pushed by the apply pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// Compact view of a proposal for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub id: String,
    pub issue_number: u64,
    pub title: String,
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    pub change_count: usize,
}

impl From<&FixProposal> for ProposalSummary {
    fn from(p: &FixProposal) -> Self {
        Self {
            id: p.id.clone(),
            issue_number: p.issue_number,
            title: p.title.clone(),
            confidence: p.confidence,
            created_at: p.created_at,
            status: p.status,
            change_count: p.code_changes.len(),
        }
    }
}

/// Outcome of the proposal generator for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub should_fix: bool,
    pub confidence: u8,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<FixProposal>,
}

impl Analysis {
    /// A documented "no fix" decision.
    pub fn no_fix(confidence: u8, reason: impl Into<String>) -> Self {
        Self {
            should_fix: false,
            confidence,
            reason: reason.into(),
            proposal: None,
        }
    }
}

/// Validation gate stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Install,
    Lint,
    Build,
    Test,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Install => "install",
            Stage::Lint => "lint",
            Stage::Build => "build",
            Stage::Test => "test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one validation stage. Not persisted beyond the current apply attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub stage: Stage,
    pub passed: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Stage results in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub stages: Vec<TestResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.stages.iter().all(|s| s.passed)
    }

    /// First failing stage, if any.
    pub fn failure(&self) -> Option<&TestResult> {
        self.stages.iter().find(|s| !s.passed)
    }
}

/// Pull request created on the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}
