//! Text rendering for pull requests, issue comments, and commit messages.

use crate::core::types::{CodeChange, FixProposal};

const COMMIT_SUBJECT_CHARS: usize = 72;

pub fn pr_title(proposal: &FixProposal) -> String {
    format!("Fix #{}: {}", proposal.issue_number, proposal.title.trim())
}

/// Markdown body: description, closing keyword, per-change diff blocks, confidence footer.
pub fn pr_body(proposal: &FixProposal) -> String {
    let mut out = String::new();
    out.push_str("## Summary\n\n");
    out.push_str(proposal.description.trim());
    out.push_str(&format!("\n\nCloses #{}\n\n", proposal.issue_number));
    out.push_str("## Changes\n");
    for change in &proposal.code_changes {
        out.push('\n');
        out.push_str(&render_change(change));
    }
    out.push_str(&format!(
        "\n---\nConfidence: {}% · Proposal `{}`\n",
        proposal.confidence, proposal.id
    ));
    out
}

fn render_change(change: &CodeChange) -> String {
    let mut out = format!("### `{}`", change.file_path);
    if change.creates_file() {
        out.push_str(" (new file)");
    }
    out.push('\n');
    let explanation = change.explanation.trim();
    if !explanation.is_empty() {
        out.push('\n');
        out.push_str(explanation);
        out.push('\n');
    }
    out.push_str("\n```diff\n");
    for line in change.original_code.lines() {
        out.push_str(&format!("- {line}\n"));
    }
    for line in change.new_code.lines() {
        out.push_str(&format!("+ {line}\n"));
    }
    out.push_str("```\n");
    out
}

pub fn issue_comment(pr_url: &str) -> String {
    format!(
        "A fix for this issue has been validated (lint, build, test) and opened as a pull request: {pr_url}"
    )
}

/// One-line commit subject derived from a change's explanation.
pub fn commit_message(change: &CodeChange) -> String {
    let explanation = change
        .explanation
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(str::trim)
        .unwrap_or_default();
    if explanation.is_empty() {
        return format!("fix: update {}", change.file_path);
    }
    let subject: String = explanation.chars().take(COMMIT_SUBJECT_CHARS).collect();
    if subject.len() < explanation.len() {
        format!("fix: {}...", subject.trim_end())
    } else {
        format!("fix: {subject}")
    }
}

/// Branch name for a proposal; uses the random suffix of the id to stay unique per attempt.
pub fn branch_name(proposal: &FixProposal) -> String {
    let suffix = proposal.id.rsplit('-').next().unwrap_or(&proposal.id);
    format!("fixbot/issue-{}-{}", proposal.issue_number, suffix)
}
