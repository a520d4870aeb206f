//! Context assembly and batch scanning against in-memory fakes.

use chrono::Duration;

use fixbot::context::assemble;
use fixbot::core::context::{CONTEXT_UNAVAILABLE, ContextLimits};
use fixbot::core::repo_ref::RepoRef;
use fixbot::scan::ScanSummary;
use fixbot::test_support::{
    FakeTracker, Harness, ScriptedModel, fix_response, issue, no_fix_response,
};

fn repo() -> RepoRef {
    RepoRef::new("acme", "widgets")
}

fn count_blocks(context: &str, label: &str) -> usize {
    context.matches(&format!("=== {label}: ")).count()
}

#[tokio::test]
async fn context_caps_files_and_truncates_long_ones() {
    let mut tracker = FakeTracker::new(repo(), "unused")
        .with_file("package.json", "{\"name\": \"widgets\"}")
        .with_file("README.md", &"r".repeat(5000))
        .with_file("lib/deep/parser.ts", "export const parse = () => 1;\n");
    for n in 0..20 {
        tracker = tracker.with_file(&format!("src/mod{n:02}.ts"), "export {};\n");
    }
    tracker = tracker.with_file("src/big.ts", &format!("{}{}", "h".repeat(4000), "t".repeat(1000)));
    let limits = ContextLimits::default();
    let target = issue(3, "Parser crash", "Stack trace points at lib/deep/parser.ts line 1.");

    let context = assemble(&tracker, Some(&target), &limits).await;

    assert_eq!(count_blocks(&context, "Config"), 2);
    assert_eq!(count_blocks(&context, "Structure"), 1);
    assert_eq!(count_blocks(&context, "File"), limits.max_files);
    // Config files come first, issue references lead the file blocks.
    let config = context.find("=== Config: ").expect("config block");
    let structure = context.find("=== Structure: ").expect("structure block");
    let first_file = context.find("=== File: ").expect("file block");
    assert!(config < structure && structure < first_file);
    assert_eq!(
        context.find("=== File: lib/deep/parser.ts ==="),
        Some(first_file)
    );
    assert!(context.contains("... [truncated]"));
    assert!(context.contains("characters truncated] ..."));
}

#[tokio::test]
async fn context_survives_listing_failure() {
    let tracker = FakeTracker::new(repo(), "unused")
        .with_file("README.md", "# widgets\n")
        .with_file("src/app.ts", "export {};\n");
    tracker.fail_listings(true);

    let context = assemble(&tracker, None, &ContextLimits::default()).await;

    assert!(context.contains("=== Config: README.md ==="));
    assert_eq!(count_blocks(&context, "Structure"), 0);
    assert_eq!(count_blocks(&context, "File"), 0);
}

#[tokio::test]
async fn context_falls_back_to_sentinel_when_nothing_is_reachable() {
    let tracker = FakeTracker::new(repo(), "unused");
    tracker.fail_listings(true);

    let context = assemble(&tracker, None, &ContextLimits::default()).await;

    assert_eq!(context, CONTEXT_UNAVAILABLE);
}

#[tokio::test]
async fn scan_skips_unchanged_issues_and_counts_outcomes() {
    let mut unlabeled = issue(3, "Question about the docs", "");
    unlabeled.labels.clear();
    let tracker = FakeTracker::new(repo(), "unused")
        .with_issue(issue(1, "Crash on empty list", "`src/list.ts` throws"))
        .with_issue(issue(2, "Off by one", "`src/range.ts` skips the last item"))
        .with_issue(unlabeled)
        .with_file("src/list.ts", "export const head = (xs) => xs[0];\n")
        .with_file("src/range.ts", "for (let i = 0; i < n - 1; i++) {}\n");
    // Issues are listed newest first.
    let model = ScriptedModel::new()
        .respond(fix_response(
            80,
            &[("src/range.ts", "i < n - 1", "i < n")],
        ))
        .respond(no_fix_response(30, "cannot reproduce"));
    let h = Harness::new(tracker, model).expect("harness");
    let labels = vec!["bug".to_string()];

    let first = h.agent.scan(&labels, 10).await.expect("scan");
    assert_eq!(
        first,
        ScanSummary {
            examined: 2,
            skipped: 0,
            proposals: 1,
            no_fix: 1,
            failed: 0,
        }
    );
    let pending = h.agent.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].issue_number, 2);

    let second = h.agent.scan(&labels, 10).await.expect("rescan");
    assert_eq!(second.skipped, 2);
    assert_eq!(h.model.requests().len(), 2);

    // An edited issue is looked at again; one with a pending proposal is not re-sent to the model.
    let mut edited = issue(2, "Off by one", "Still skips the last item");
    edited.updated_at += Duration::hours(1);
    h.tracker.add_issue(edited);
    let third = h.agent.scan(&labels, 10).await.expect("scan after edit");
    assert_eq!(third.examined, 2);
    assert_eq!(third.skipped, 1);
    assert_eq!(third.no_fix, 1);
    assert_eq!(h.model.requests().len(), 2);
}

#[tokio::test]
async fn scan_respects_limit() {
    let tracker = FakeTracker::new(repo(), "unused")
        .with_issue(issue(1, "One", ""))
        .with_issue(issue(2, "Two", ""))
        .with_issue(issue(3, "Three", ""));
    let model = ScriptedModel::new().respond(no_fix_response(10, "unclear"));
    let h = Harness::new(tracker, model).expect("harness");

    let summary = h.agent.scan(&["bug".to_string()], 1).await.expect("scan");

    assert_eq!(summary.examined, 1);
    assert_eq!(summary.no_fix, 1);
    let requests = h.model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].iter().any(|m| m.content.contains("# Issue #3: Three")));
}

#[tokio::test]
async fn agent_context_uses_configured_limits() {
    let mut tracker = FakeTracker::new(repo(), "unused");
    for n in 0..6 {
        tracker = tracker.with_file(&format!("src/f{n}.rs"), "fn main() {}\n");
    }
    let h = Harness::with_config(tracker, ScriptedModel::new(), |config| {
        config.context.max_files = 2;
    })
    .expect("harness");

    let context = h.agent.context(None).await;

    assert_eq!(count_blocks(&context, "File"), 2);
}

#[tokio::test]
async fn scan_retries_issue_after_failed_approval_request() {
    let tracker = FakeTracker::new(repo(), "unused")
        .with_issue(issue(4, "Crash on empty list", "`src/list.ts` throws"))
        .with_file("src/list.ts", "export const head = (xs) => xs[0];\n");
    let fix = fix_response(85, &[("src/list.ts", "xs[0]", "xs.length ? xs[0] : undefined")]);
    let model = ScriptedModel::new().respond(fix.clone()).respond(fix);
    let h = Harness::new(tracker, model).expect("harness");
    let labels = vec!["bug".to_string()];

    h.notifier.fail_validation_requests(true);
    let first = h.agent.scan(&labels, 10).await.expect("scan");
    assert_eq!(first.failed, 1);
    assert!(h.agent.list_pending().is_empty());

    h.notifier.fail_validation_requests(false);
    let second = h.agent.scan(&labels, 10).await.expect("rescan");
    assert_eq!(second.skipped, 0);
    assert_eq!(second.proposals, 1);
    assert_eq!(h.agent.list_pending().len(), 1);
    assert_eq!(h.model.requests().len(), 2);
}

#[tokio::test]
async fn scan_retries_issue_after_model_outage() {
    let tracker = FakeTracker::new(repo(), "unused").with_issue(issue(5, "Flaky", ""));
    let model = ScriptedModel::new()
        .fail("connection reset")
        .respond(no_fix_response(20, "not enough detail"));
    let h = Harness::new(tracker, model).expect("harness");
    let labels = vec!["bug".to_string()];

    let first = h.agent.scan(&labels, 10).await.expect("scan");
    assert_eq!(first.no_fix, 1);

    let second = h.agent.scan(&labels, 10).await.expect("retry");
    assert_eq!(second.skipped, 0);
    assert_eq!(second.no_fix, 1);

    // A real verdict is remembered.
    let third = h.agent.scan(&labels, 10).await.expect("rescan");
    assert_eq!(third.skipped, 1);
    assert_eq!(h.model.requests().len(), 2);
}
