//! Proposal generation: one model call per issue, degraded to "no fix" on any failure.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, instrument, warn};

use crate::agent::RepoAgent;
use crate::core::decision::decide;
use crate::core::response::parse_verdict;
use crate::core::types::{Analysis, Issue};
use crate::error::AgentError;
use crate::io::llm::LanguageModel;
use crate::io::prompt::analysis_messages;
use crate::store::IssueClaim;

const ID_SUFFIX_LEN: usize = 6;

/// `fix-<unix-millis>-<6 lowercase alphanumerics>`.
pub fn new_proposal_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("fix-{}-{suffix}", now.timestamp_millis())
}

/// Result of one model round trip.
enum Attempt {
    /// The model answered with a parseable verdict.
    Verdict(Analysis),
    /// Prompt, request, or response failed; a later scan should try again.
    Degraded(Analysis),
}

impl Attempt {
    fn into_analysis(self) -> Analysis {
        match self {
            Attempt::Verdict(analysis) | Attempt::Degraded(analysis) => analysis,
        }
    }
}

/// Ask the model about `issue` and turn the answer into an [`Analysis`].
///
/// Never fails: request errors, empty responses, and malformed JSON all
/// become a no-fix analysis whose reason says what went wrong.
pub async fn generate(
    model: &dyn LanguageModel,
    issue: &Issue,
    repo_url: &str,
    context: &str,
) -> Analysis {
    attempt(model, issue, repo_url, context).await.into_analysis()
}

#[instrument(skip_all, fields(issue = issue.number))]
async fn attempt(
    model: &dyn LanguageModel,
    issue: &Issue,
    repo_url: &str,
    context: &str,
) -> Attempt {
    let messages = match analysis_messages(issue, repo_url, context) {
        Ok(messages) => messages,
        Err(err) => {
            return Attempt::Degraded(Analysis::no_fix(0, format!("could not render prompt: {err:#}")));
        }
    };
    let raw = match model.complete(&messages).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "language model request failed");
            return Attempt::Degraded(Analysis::no_fix(
                0,
                format!("language model request failed: {err:#}"),
            ));
        }
    };
    if raw.trim().is_empty() {
        return Attempt::Degraded(Analysis::no_fix(0, "language model returned an empty response"));
    }
    let verdict = match parse_verdict(&raw) {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(err = %err, "unparseable model response");
            return Attempt::Degraded(Analysis::no_fix(
                0,
                format!("could not parse model response: {err}"),
            ));
        }
    };
    let now = Utc::now();
    Attempt::Verdict(decide(issue.number, verdict, new_proposal_id(now), now))
}

impl RepoAgent {
    /// Fetch an issue, analyze it, and store and announce any resulting proposal.
    pub async fn analyze_issue(&self, number: u64) -> Result<Analysis, AgentError> {
        let issue = self.tracker.get_issue(number).await?;
        self.analyze_loaded(&issue).await
    }

    /// Analyze one issue snapshot.
    ///
    /// The issue is recorded as analyzed only once the model gave a verdict
    /// and any resulting proposal was stored and announced.
    #[instrument(skip_all, fields(repo = %self.repo, issue = issue.number))]
    pub(crate) async fn analyze_loaded(&self, issue: &Issue) -> Result<Analysis, AgentError> {
        let _claim = match self.store.claim_issue(issue.number) {
            IssueClaim::Claimed(claim) => claim,
            IssueClaim::Pending(existing) => {
                info!(existing = %existing.id, "issue already has a pending proposal");
                return Ok(Analysis::no_fix(
                    existing.confidence,
                    format!(
                        "issue #{} already has pending proposal {}",
                        issue.number, existing.id
                    ),
                ));
            }
            IssueClaim::InFlight => {
                info!("issue is already being analyzed");
                return Ok(Analysis::no_fix(
                    0,
                    format!("issue #{} is already being analyzed", issue.number),
                ));
            }
        };

        let repo_url = self.tracker.repo_url();
        let context = self.context(Some(issue)).await;
        let (analysis, answered) = match attempt(self.model.as_ref(), issue, &repo_url, &context).await
        {
            Attempt::Verdict(analysis) => (analysis, true),
            Attempt::Degraded(analysis) => (analysis, false),
        };

        match &analysis.proposal {
            Some(proposal) => {
                self.store.insert(proposal.clone());
                if let Err(err) = self.notifier.send_validation_request(proposal, &repo_url).await {
                    self.store.remove(&proposal.id);
                    return Err(AgentError::Collaborator(
                        err.context("send approval request"),
                    ));
                }
                info!(id = %proposal.id, confidence = proposal.confidence, "proposal created");
            }
            None => {
                info!(reason = %analysis.reason, "no fix proposed");
                if let Err(err) = self
                    .notifier
                    .send_no_fix_notice(issue, &repo_url, &analysis.reason)
                    .await
                {
                    warn!(err = %format!("{err:#}"), "failed to send no-fix notice");
                }
            }
        }
        if answered {
            self.mark_analyzed(issue);
        }
        Ok(analysis)
    }
}
