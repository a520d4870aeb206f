//! Batch analysis of open issues.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agent::RepoAgent;
use crate::error::AgentError;

/// Counts from one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub examined: usize,
    /// Issues unchanged since they were last analyzed.
    pub skipped: usize,
    pub proposals: usize,
    pub no_fix: usize,
    pub failed: usize,
}

impl RepoAgent {
    /// Analyze up to `limit` open issues carrying `labels`.
    ///
    /// Each issue is handled on its own; a failure is logged and the scan moves on.
    #[instrument(skip_all, fields(repo = %self.repo, limit))]
    pub async fn scan(&self, labels: &[String], limit: usize) -> Result<ScanSummary, AgentError> {
        let issues = self.tracker.list_issues(labels, limit).await?;
        let mut summary = ScanSummary::default();
        for issue in issues.iter().take(limit) {
            summary.examined += 1;
            if self.already_analyzed(issue) {
                summary.skipped += 1;
                continue;
            }
            match self.analyze_loaded(issue).await {
                Ok(analysis) if analysis.proposal.is_some() => summary.proposals += 1,
                Ok(_) => summary.no_fix += 1,
                Err(err) => {
                    warn!(issue = issue.number, err = %err, "issue analysis failed");
                    summary.failed += 1;
                }
            }
        }
        info!(?summary, "scan finished");
        Ok(summary)
    }
}
