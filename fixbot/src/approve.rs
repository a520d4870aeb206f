//! The approve pipeline: prepare, apply, validate, push, publish.

use anyhow::anyhow;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agent::RepoAgent;
use crate::core::pr_body::{branch_name, issue_comment, pr_body, pr_title};
use crate::core::types::{FixProposal, ProposalStatus, PullRequest, TestResult};
use crate::error::AgentError;
use crate::io::patch::{PatchError, apply_changes};
use crate::io::workspace::prepare_checkout;

/// Stage output kept in errors and failure notices.
const FAILURE_OUTPUT_CHARS: usize = 4000;

/// Result of a successful approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveOutcome {
    pub proposal: FixProposal,
    pub pull_request: PullRequest,
}

impl RepoAgent {
    /// Approve a pending proposal and run the whole pipeline before returning.
    ///
    /// On any failure the proposal ends up rejected, a failure notice is sent,
    /// and the error is returned.
    #[instrument(skip_all, fields(repo = %self.repo, id))]
    pub async fn approve(&self, id: &str) -> Result<ApproveOutcome, AgentError> {
        let proposal = self.store.begin_approval(id)?;
        info!(issue = proposal.issue_number, "proposal approved, applying");

        match self.run_pipeline(&proposal).await {
            Ok(pull_request) => {
                let applied = self.store.mark_applied(id, &pull_request.url)?;
                if let Err(err) = self
                    .notifier
                    .send_outcome(&applied, Some(&pull_request.url), true, None)
                    .await
                {
                    warn!(err = %format!("{err:#}"), "failed to send success notice");
                }
                info!(pr = %pull_request.url, "proposal applied");
                Ok(ApproveOutcome {
                    proposal: applied,
                    pull_request,
                })
            }
            Err(err) => {
                warn!(err = %err, "apply pipeline failed");
                let rejected = match self.store.set_status(id, ProposalStatus::Rejected) {
                    Ok(p) => p,
                    Err(store_err) => {
                        warn!(err = %store_err, "could not mark proposal rejected");
                        proposal
                    }
                };
                let detail = err.to_string();
                if let Err(notify_err) = self
                    .notifier
                    .send_outcome(&rejected, None, false, Some(&detail))
                    .await
                {
                    warn!(err = %format!("{notify_err:#}"), "failed to send failure notice");
                }
                Err(err)
            }
        }
    }

    /// Reject a pending proposal and drop it.
    #[instrument(skip_all, fields(repo = %self.repo, id))]
    pub fn reject(&self, id: &str) -> Result<FixProposal, AgentError> {
        let rejected = self.store.reject(id)?;
        info!(issue = rejected.issue_number, "proposal rejected");
        Ok(rejected)
    }

    async fn run_pipeline(&self, proposal: &FixProposal) -> Result<PullRequest, AgentError> {
        let default_branch = self.tracker.get_default_branch().await?;
        let branch = branch_name(proposal);
        self.store.record_branch(&proposal.id, &branch);

        let guard = self.tree_lock.lock().await;
        let git = self.git();
        let clone_url = self.tracker.clone_url();
        let changes = proposal.code_changes.clone();
        let (base, head) = (default_branch.clone(), branch.clone());
        let commits = blocking({
            let git = git.clone();
            move || {
                prepare_checkout(&git, &clone_url, &base)?;
                Ok(apply_changes(&git, &head, &changes)?)
            }
        })
        .await?;
        info!(commits, branch = %branch, "changes committed");

        let gate = self.gate();
        let dir = self.checkout().to_path_buf();
        let report = blocking(move || Ok(gate.validate(&dir))).await?;
        if let Some(failure) = report.failure() {
            return Err(validation_error(failure));
        }

        self.tracker.create_branch(&branch, &default_branch).await?;
        let head = branch.clone();
        blocking(move || {
            git.push_branch("origin", &head)
                .map_err(|err| AgentError::Patch(PatchError::Git(err)))
        })
        .await?;
        drop(guard);

        let pull_request = self
            .tracker
            .create_pull_request(&pr_title(proposal), &pr_body(proposal), &branch, &default_branch)
            .await?;
        if let Err(err) = self
            .tracker
            .add_issue_comment(proposal.issue_number, &issue_comment(&pull_request.url))
            .await
        {
            warn!(err = %format!("{err:#}"), "failed to comment on issue");
        }
        Ok(pull_request)
    }
}

/// Run blocking git/file/subprocess work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, AgentError>
where
    F: FnOnce() -> Result<T, AgentError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AgentError::Collaborator(anyhow!("blocking task failed: {err}")))?
}

fn validation_error(failure: &TestResult) -> AgentError {
    let mut output = String::new();
    if let Some(error) = &failure.error {
        output.push_str(error);
        output.push('\n');
    }
    output.push_str(&tail(&failure.output, FAILURE_OUTPUT_CHARS));
    AgentError::ValidationFailed {
        stage: failure.stage,
        output: output.trim_end().to_string(),
    }
}

/// Last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().skip(total - max_chars).collect();
    format!("[{} characters omitted]\n{kept}", total - max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Stage;

    #[test]
    fn tail_keeps_end_of_output() {
        assert_eq!(tail("abc", 5), "abc");
        assert_eq!(tail("abcdef", 2), "[4 characters omitted]\nef");
    }

    #[test]
    fn validation_error_leads_with_reason() {
        let err = validation_error(&TestResult {
            stage: Stage::Lint,
            passed: false,
            output: "src/a.ts: missing semicolon\n".to_string(),
            error: Some("lint exited with code 1".to_string()),
            duration_ms: 10,
        });
        assert_eq!(
            err.to_string(),
            "validation failed at the lint stage:\nlint exited with code 1\nsrc/a.ts: missing semicolon"
        );
    }
}
