//! Human notifications: approval requests and outcome notices.
//!
//! [`SmtpNotifier`] sends plain-text mail through an SMTP relay with `lettre`.
//! When no relay is configured the agent falls back to [`LogNotifier`], which
//! only writes the notices to the log.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument, warn};

use crate::core::repo_ref::RepoRef;
use crate::core::types::{FixProposal, Issue};
use crate::io::config::{MailConfig, Secrets};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask a human to approve or reject a pending proposal.
    async fn send_validation_request(&self, proposal: &FixProposal, repo_url: &str) -> Result<()>;

    /// Tell a human that an issue was analyzed and left alone.
    async fn send_no_fix_notice(&self, issue: &Issue, repo_url: &str, reason: &str) -> Result<()>;

    /// Report the result of an approval: a PR link on success, `detail` on failure.
    async fn send_outcome(
        &self,
        proposal: &FixProposal,
        pr_url: Option<&str>,
        success: bool,
        detail: Option<&str>,
    ) -> Result<()>;

    /// True when notices can actually reach a human.
    async fn check_connection(&self) -> bool;
}

/// Subject and body of one notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

/// Build the approval request, with links back to the HTTP surface.
pub fn validation_request(proposal: &FixProposal, repo_url: &str, public_url: &str) -> Notice {
    let base = public_url.trim_end_matches('/');
    let repo_query = RepoRef::parse(repo_url)
        .map(|r| format!("?repo={}", r.slug()))
        .unwrap_or_default();
    let mut body = format!(
        "A fix has been proposed for issue #{} in {repo_url}.\n\n\
         Title: {}\nConfidence: {}%\nProposal: {}\n\n{}\n\nFiles:\n",
        proposal.issue_number,
        proposal.title,
        proposal.confidence,
        proposal.id,
        proposal.description.trim(),
    );
    for change in &proposal.code_changes {
        let marker = if change.creates_file() { " (new file)" } else { "" };
        body.push_str(&format!("  - {}{marker}\n", change.file_path));
    }
    body.push_str(&format!(
        "\nApprove (applies, validates, and opens a PR):\n  {base}/validate/{id}/approve{repo_query}\n\
         Reject:\n  {base}/validate/{id}/reject{repo_query}\n",
        id = proposal.id,
    ));
    Notice {
        subject: format!(
            "[fixbot] Approve fix for #{}: {}",
            proposal.issue_number, proposal.title
        ),
        body,
    }
}

pub fn no_fix_notice(issue: &Issue, repo_url: &str, reason: &str) -> Notice {
    Notice {
        subject: format!("[fixbot] No fix proposed for #{}: {}", issue.number, issue.title),
        body: format!(
            "Issue #{} in {repo_url} was analyzed and no fix was proposed.\n\nReason: {}\n\n{}/issues/{}\n",
            issue.number,
            reason.trim(),
            repo_url.trim_end_matches('/'),
            issue.number,
        ),
    }
}

pub fn outcome_notice(
    proposal: &FixProposal,
    pr_url: Option<&str>,
    success: bool,
    detail: Option<&str>,
) -> Notice {
    if success {
        let link = pr_url.unwrap_or("(no link)");
        return Notice {
            subject: format!("[fixbot] PR opened for #{}", proposal.issue_number),
            body: format!(
                "The fix \"{}\" passed validation and was opened as a pull request:\n\n  {link}\n",
                proposal.title
            ),
        };
    }
    let mut body = format!(
        "The fix \"{}\" for issue #{} was not published.\nProposal {} is now rejected.\n",
        proposal.title, proposal.issue_number, proposal.id
    );
    if let Some(detail) = detail {
        body.push_str(&format!("\n{}\n", detail.trim()));
    }
    Notice {
        subject: format!("[fixbot] Fix failed for #{}", proposal.issue_number),
        body,
    }
}

/// Mail delivery through an SMTP relay (STARTTLS).
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    public_url: String,
}

impl SmtpNotifier {
    pub fn new(config: &MailConfig, secrets: &Secrets, public_url: &str) -> Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| anyhow!("mail.smtp_host is not set"))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("configure smtp relay {host}"))?
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&secrets.smtp_user, &secrets.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = config
            .from
            .parse()
            .with_context(|| format!("parse mail.from '{}'", config.from))?;
        let to = config
            .to
            .iter()
            .map(|addr| {
                addr.parse()
                    .with_context(|| format!("parse mail.to '{addr}'"))
            })
            .collect::<Result<Vec<Mailbox>>>()?;
        if to.is_empty() {
            return Err(anyhow!("mail.to must list at least one recipient"));
        }
        Ok(Self {
            transport: builder.build(),
            from,
            to,
            public_url: public_url.to_string(),
        })
    }

    #[instrument(skip_all, fields(subject = %notice.subject))]
    async fn deliver(&self, notice: Notice) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notice.subject)
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let message = builder.body(notice.body).context("build email")?;
        self.transport.send(message).await.context("send email")?;
        info!(recipients = self.to.len(), "email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_validation_request(&self, proposal: &FixProposal, repo_url: &str) -> Result<()> {
        self.deliver(validation_request(proposal, repo_url, &self.public_url))
            .await
    }

    async fn send_no_fix_notice(&self, issue: &Issue, repo_url: &str, reason: &str) -> Result<()> {
        self.deliver(no_fix_notice(issue, repo_url, reason)).await
    }

    async fn send_outcome(
        &self,
        proposal: &FixProposal,
        pr_url: Option<&str>,
        success: bool,
        detail: Option<&str>,
    ) -> Result<()> {
        self.deliver(outcome_notice(proposal, pr_url, success, detail))
            .await
    }

    async fn check_connection(&self) -> bool {
        match self.transport.test_connection().await {
            Ok(ok) => ok,
            Err(err) => {
                warn!(err = %err, "smtp connection check failed");
                false
            }
        }
    }
}

/// Notifier used when no SMTP relay is configured.
pub struct LogNotifier {
    public_url: String,
}

impl LogNotifier {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_validation_request(&self, proposal: &FixProposal, repo_url: &str) -> Result<()> {
        let notice = validation_request(proposal, repo_url, &self.public_url);
        info!(subject = %notice.subject, "approval requested\n{}", notice.body);
        Ok(())
    }

    async fn send_no_fix_notice(&self, issue: &Issue, repo_url: &str, reason: &str) -> Result<()> {
        let notice = no_fix_notice(issue, repo_url, reason);
        info!(subject = %notice.subject, "no fix proposed");
        Ok(())
    }

    async fn send_outcome(
        &self,
        proposal: &FixProposal,
        pr_url: Option<&str>,
        success: bool,
        detail: Option<&str>,
    ) -> Result<()> {
        let notice = outcome_notice(proposal, pr_url, success, detail);
        info!(subject = %notice.subject, success, "fix outcome");
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CodeChange, IssueState, ProposalStatus};
    use chrono::Utc;

    fn proposal() -> FixProposal {
        FixProposal {
            id: "fix-1-abc123".to_string(),
            issue_number: 42,
            title: "Guard empty input".to_string(),
            description: "Return early.".to_string(),
            code_changes: vec![CodeChange {
                file_path: "src/new.ts".to_string(),
                original_code: String::new(),
                new_code: "x".to_string(),
                explanation: String::new(),
            }],
            confidence: 90,
            created_at: Utc::now(),
            status: ProposalStatus::Pending,
            branch: None,
            pr_url: None,
        }
    }

    #[test]
    fn validation_request_links_back_with_repo() {
        let notice = validation_request(
            &proposal(),
            "https://github.com/acme/widgets",
            "https://fixbot.example.com/",
        );
        assert!(notice.subject.contains("#42"));
        assert!(notice.body.contains(
            "https://fixbot.example.com/validate/fix-1-abc123/approve?repo=acme/widgets"
        ));
        assert!(notice.body.contains("/validate/fix-1-abc123/reject?repo=acme/widgets"));
        assert!(notice.body.contains("src/new.ts (new file)"));
    }

    #[test]
    fn outcome_notice_failure_has_no_pr_reference() {
        let notice = outcome_notice(&proposal(), None, false, Some("lint failed"));
        assert!(notice.subject.contains("failed"));
        assert!(notice.body.contains("lint failed"));
        assert!(!notice.body.contains("pull request:"));
    }

    #[test]
    fn no_fix_notice_links_issue() {
        let issue = Issue {
            number: 9,
            title: "Question".to_string(),
            body: String::new(),
            labels: Default::default(),
            state: IssueState::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            author_login: "octocat".to_string(),
        };
        let notice = no_fix_notice(&issue, "https://github.com/acme/widgets", "not a bug");
        assert!(notice.body.contains("https://github.com/acme/widgets/issues/9"));
        assert!(notice.body.contains("not a bug"));
    }

    #[tokio::test]
    async fn log_notifier_reports_no_connection() {
        let notifier = LogNotifier::new("http://localhost:3000");
        assert!(!notifier.check_connection().await);
        notifier
            .send_validation_request(&proposal(), "https://github.com/acme/widgets")
            .await
            .expect("log");
    }
}
