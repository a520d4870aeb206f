//! End-to-end pipeline tests: analyze an issue, approve or reject the
//! proposal, and check what reached the git remote and the tracker.
//!
//! The remote is a real bare repository in a temp dir; tracker, model, and
//! notifier are in-memory fakes.

use fixbot::AgentError;
use fixbot::core::repo_ref::RepoRef;
use fixbot::core::types::{ProposalStatus, Stage};
use fixbot::io::patch::PatchError;
use fixbot::test_support::{
    FakeTracker, Harness, Notice, ScriptedModel, TestRemote, fix_response, issue,
    no_fix_response,
};

const MATH_TS: &str = "export function div(a: number, b: number) {\n  return a / b;\n}\n\nexport function ratio(a: number, b: number) {\n  return a / b;\n}\n";

fn remote() -> TestRemote {
    TestRemote::new(&[("src/math.ts", MATH_TS), ("README.md", "# calc\n")]).expect("remote")
}

fn tracker(remote: &TestRemote) -> FakeTracker {
    FakeTracker::new(RepoRef::new("acme", "calc"), remote.url())
        .with_issue(issue(7, "Division by zero", "`div` in `src/math.ts` returns Infinity."))
        .with_file("src/math.ts", MATH_TS)
        .with_file("README.md", "# calc\n")
}

fn guard_fix(confidence: u8) -> String {
    fix_response(
        confidence,
        &[
            ("src/math.ts", "return a / b;", "return b === 0 ? 0 : a / b;"),
            ("src/zero.ts", "", "export const ZERO = 0;\n"),
        ],
    )
}

#[tokio::test]
async fn analyze_stores_pending_proposal_and_requests_approval() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(88)))
        .expect("harness");

    let analysis = h.agent.analyze_issue(7).await.expect("analyze");

    assert!(analysis.should_fix);
    assert_eq!(analysis.confidence, 88);
    let proposal = analysis.proposal.expect("proposal");
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert_eq!(proposal.issue_number, 7);
    assert_eq!(proposal.code_changes.len(), 2);
    assert_eq!(h.agent.list_pending(), vec![proposal.clone()]);
    assert_eq!(
        h.notifier.notices(),
        vec![Notice::ValidationRequest {
            id: proposal.id.clone(),
            repo_url: "https://github.com/acme/calc".to_string(),
        }]
    );

    // The model saw the referenced file in its context.
    let requests = h.model.requests();
    assert_eq!(requests.len(), 1);
    let user = &requests[0].last().expect("user message").content;
    assert!(user.contains("=== File: src/math.ts ==="));
    assert!(user.contains("# Issue #7: Division by zero"));
}

#[tokio::test]
async fn approve_pushes_branch_opens_pr_and_comments() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(90)))
        .expect("harness");
    let id = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal")
        .id;

    let outcome = h.agent.approve(&id).await.expect("approve");

    let branch = outcome.proposal.branch.clone().expect("branch recorded");
    assert!(branch.starts_with("fixbot/issue-7-"));
    assert!(remote.has_branch(&branch));

    // Only the first occurrence is replaced.
    let math = remote.file_on(&branch, "src/math.ts").expect("math.ts on branch");
    assert_eq!(math.matches("return b === 0 ? 0 : a / b;").count(), 1);
    assert_eq!(math.matches("return a / b;").count(), 1);
    assert_eq!(
        remote.file_on(&branch, "src/zero.ts").as_deref(),
        Some("export const ZERO = 0;\n")
    );
    assert_eq!(
        remote.subjects_since_main(&branch).expect("log"),
        vec!["fix: update src/math.ts", "fix: update src/zero.ts"]
    );
    // main is untouched
    assert_eq!(remote.file_on("main", "src/math.ts").as_deref(), Some(MATH_TS));

    assert_eq!(
        h.tracker.created_branches(),
        vec![(branch.clone(), "main".to_string())]
    );
    let prs = h.tracker.pull_requests();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].head, branch);
    assert_eq!(prs[0].base, "main");
    assert_eq!(prs[0].title, "Fix #7: Guard empty input");
    assert!(prs[0].body.contains("Closes #7"));

    let pr_url = outcome.pull_request.url.clone();
    assert_eq!(pr_url, "https://github.com/acme/calc/pull/100");
    let comments = h.tracker.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, 7);
    assert!(comments[0].1.contains(&pr_url));

    assert_eq!(outcome.proposal.status, ProposalStatus::Applied);
    assert_eq!(outcome.proposal.pr_url.as_deref(), Some(pr_url.as_str()));
    assert_eq!(
        h.agent.get(&id).map(|p| p.status),
        Some(ProposalStatus::Applied)
    );
    assert!(h.agent.list_pending().is_empty());
    assert_eq!(
        h.notifier.outcomes(),
        vec![Notice::Outcome {
            id,
            pr_url: Some(pr_url),
            success: true,
            detail: None,
        }]
    );
}

#[tokio::test]
async fn conflicting_change_rejects_without_pushing() {
    let remote = remote();
    let model = ScriptedModel::new().respond(fix_response(
        85,
        &[("src/math.ts", "return a % b;", "return 0;")],
    ));
    let h = Harness::new(tracker(&remote), model).expect("harness");
    let proposal = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal");

    let err = h.agent.approve(&proposal.id).await.expect_err("conflict");

    assert!(matches!(err, AgentError::Patch(PatchError::Conflict { ref path }) if path == "src/math.ts"));
    assert_eq!(err.code(), "apply_conflict");
    let branch = h.agent.get(&proposal.id).and_then(|p| p.branch).expect("branch");
    assert!(!remote.has_branch(&branch));
    assert!(h.tracker.pull_requests().is_empty());
    assert_eq!(
        h.agent.get(&proposal.id).map(|p| p.status),
        Some(ProposalStatus::Rejected)
    );
    match h.notifier.outcomes().as_slice() {
        [Notice::Outcome { success, pr_url, detail, .. }] => {
            assert!(!success);
            assert_eq!(pr_url, &None);
            let detail = detail.as_deref().expect("detail");
            assert!(detail.contains("original code not found in src/math.ts"), "{detail}");
        }
        other => panic!("unexpected outcomes: {other:?}"),
    }
}

#[tokio::test]
async fn lint_failure_stops_before_build_and_push() {
    let remote = remote();
    let h = Harness::with_config(
        tracker(&remote),
        ScriptedModel::new().respond(guard_fix(90)),
        |config| {
            config.validation.lint_command = Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'src/math.ts:2 unexpected ternary' >&2; exit 1".to_string(),
            ]);
            config.validation.build_command = Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "touch build-ran".to_string(),
            ]);
        },
    )
    .expect("harness");
    let id = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal")
        .id;

    let err = h.agent.approve(&id).await.expect_err("lint failure");

    match &err {
        AgentError::ValidationFailed { stage, output } => {
            assert_eq!(*stage, Stage::Lint);
            assert!(output.contains("unexpected ternary"), "{output}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), "validation_failed");
    assert!(!h.agent.checkout().join("build-ran").exists());
    assert!(h.tracker.created_branches().is_empty());
    let branch = h.agent.get(&id).and_then(|p| p.branch).expect("branch");
    assert!(!remote.has_branch(&branch));
    assert!(h.tracker.pull_requests().is_empty());
    assert_eq!(h.agent.get(&id).map(|p| p.status), Some(ProposalStatus::Rejected));
    assert!(matches!(
        h.notifier.outcomes().as_slice(),
        [Notice::Outcome { success: false, .. }]
    ));
}

#[tokio::test]
async fn build_failure_skips_tests_and_rejects() {
    let remote = remote();
    let h = Harness::with_config(
        tracker(&remote),
        ScriptedModel::new().respond(guard_fix(90)),
        |config| {
            config.validation.build_command = Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'tsc: type error' >&2; exit 2".to_string(),
            ]);
            config.validation.test_command = Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "touch test-ran".to_string(),
            ]);
        },
    )
    .expect("harness");
    let id = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal")
        .id;

    let err = h.agent.approve(&id).await.expect_err("build failure");

    match &err {
        AgentError::ValidationFailed { stage, output } => {
            assert_eq!(*stage, Stage::Build);
            assert!(output.contains("type error"), "{output}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!h.agent.checkout().join("test-ran").exists());
    assert!(h.tracker.pull_requests().is_empty());
    assert!(h.tracker.created_branches().is_empty());
    assert_eq!(h.agent.get(&id).map(|p| p.status), Some(ProposalStatus::Rejected));
}

#[tokio::test]
async fn concurrent_analyses_of_one_issue_store_one_proposal() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(88)))
        .expect("harness");

    let (a, b) = tokio::join!(h.agent.analyze_issue(7), h.agent.analyze_issue(7));
    let a = a.expect("first analysis");
    let b = b.expect("second analysis");

    assert_eq!(
        [a.proposal.is_some(), b.proposal.is_some()]
            .iter()
            .filter(|created| **created)
            .count(),
        1
    );
    let deferred = if a.proposal.is_some() { &b } else { &a };
    assert!(deferred.reason.contains("already being analyzed"), "{}", deferred.reason);
    assert_eq!(h.agent.list_pending().len(), 1);
    assert_eq!(h.model.requests().len(), 1);
    let requests = h
        .notifier
        .notices()
        .into_iter()
        .filter(|n| matches!(n, Notice::ValidationRequest { .. }))
        .count();
    assert_eq!(requests, 1);
}

#[tokio::test]
async fn pull_request_failure_rejects_proposal() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(90)))
        .expect("harness");
    h.tracker.fail_pull_requests(true);
    let id = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal")
        .id;

    let err = h.agent.approve(&id).await.expect_err("pr failure");

    assert_eq!(err.code(), "collaborator_failure");
    assert!(err.to_string().contains("pull request creation rejected"));
    assert_eq!(h.agent.get(&id).map(|p| p.status), Some(ProposalStatus::Rejected));
    assert!(h.tracker.comments().is_empty());
}

#[tokio::test]
async fn approving_twice_is_invalid_state() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(90)))
        .expect("harness");
    let id = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal")
        .id;

    h.agent.approve(&id).await.expect("first approve");
    let err = h.agent.approve(&id).await.expect_err("second approve");

    assert!(matches!(
        err,
        AgentError::InvalidState { status: ProposalStatus::Applied, .. }
    ));
    assert_eq!(h.tracker.pull_requests().len(), 1);
    assert!(matches!(
        h.agent.reject(&id),
        Err(AgentError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn reject_drops_proposal_and_second_reject_is_not_found() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(90)))
        .expect("harness");
    let id = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal")
        .id;

    let rejected = h.agent.reject(&id).expect("reject");
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    assert!(h.agent.get(&id).is_none());
    assert!(h.agent.list_pending().is_empty());

    assert!(matches!(h.agent.reject(&id), Err(AgentError::NotFound(_))));
    assert!(matches!(
        h.agent.approve(&id).await,
        Err(AgentError::NotFound(_))
    ));
}

#[tokio::test]
async fn low_confidence_is_no_fix() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(65)))
        .expect("harness");

    let analysis = h.agent.analyze_issue(7).await.expect("analyze");

    assert!(!analysis.should_fix);
    assert_eq!(analysis.confidence, 65);
    assert!(analysis.proposal.is_none());
    assert!(analysis.reason.contains("below the 70% threshold"), "{}", analysis.reason);
    assert!(h.agent.list_pending().is_empty());
    assert!(matches!(
        h.notifier.notices().as_slice(),
        [Notice::NoFix { issue: 7, .. }]
    ));
}

#[tokio::test]
async fn declined_fix_is_reported() {
    let remote = remote();
    let model = ScriptedModel::new().respond(no_fix_response(40, "needs a product decision"));
    let h = Harness::new(tracker(&remote), model).expect("harness");

    let analysis = h.agent.analyze_issue(7).await.expect("analyze");

    assert!(!analysis.should_fix);
    assert_eq!(analysis.reason, "needs a product decision");
    assert_eq!(
        h.notifier.notices(),
        vec![Notice::NoFix {
            issue: 7,
            reason: "needs a product decision".to_string(),
        }]
    );
}

#[tokio::test]
async fn model_failure_degrades_to_no_fix() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().fail("503 upstream overloaded"))
        .expect("harness");

    let analysis = h.agent.analyze_issue(7).await.expect("analyze");

    assert!(!analysis.should_fix);
    assert_eq!(analysis.confidence, 0);
    assert!(analysis.reason.contains("503 upstream overloaded"), "{}", analysis.reason);
    assert!(h.agent.list_pending().is_empty());
}

#[tokio::test]
async fn unparseable_response_degrades_to_no_fix() {
    let remote = remote();
    let model = ScriptedModel::new().respond("I think the bug is in div, good luck!");
    let h = Harness::new(tracker(&remote), model).expect("harness");

    let analysis = h.agent.analyze_issue(7).await.expect("analyze");

    assert!(!analysis.should_fix);
    assert!(analysis.reason.starts_with("could not parse model response"), "{}", analysis.reason);
}

#[tokio::test]
async fn failed_approval_request_discards_proposal() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new().respond(guard_fix(90)))
        .expect("harness");
    h.notifier.fail_validation_requests(true);

    let err = h.agent.analyze_issue(7).await.expect_err("send failure");

    assert_eq!(err.code(), "collaborator_failure");
    assert!(err.to_string().contains("send approval request"));
    assert!(h.agent.list_pending().is_empty());
}

#[tokio::test]
async fn second_analysis_defers_to_pending_proposal() {
    let remote = remote();
    let model = ScriptedModel::new().respond(guard_fix(90)).respond(guard_fix(95));
    let h = Harness::new(tracker(&remote), model).expect("harness");

    let first = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze")
        .proposal
        .expect("proposal");
    let second = h.agent.analyze_issue(7).await.expect("analyze again");

    assert!(second.proposal.is_none());
    assert_eq!(
        second.reason,
        format!("issue #7 already has pending proposal {}", first.id)
    );
    assert_eq!(h.model.requests().len(), 1);
    assert_eq!(h.agent.list_pending().len(), 1);
}

#[tokio::test]
async fn unknown_issue_is_collaborator_failure() {
    let remote = remote();
    let h = Harness::new(tracker(&remote), ScriptedModel::new()).expect("harness");

    let err = h.agent.analyze_issue(404).await.expect_err("missing issue");

    assert_eq!(err.code(), "collaborator_failure");
    assert!(h.model.requests().is_empty());
}

#[tokio::test]
async fn approvals_on_one_repository_do_not_interleave() {
    let remote = remote();
    let tracker = tracker(&remote).with_issue(issue(8, "Ratio of zero", "`ratio` divides by zero"));
    let model = ScriptedModel::new()
        .respond(fix_response(90, &[("src/math.ts", "return a / b;", "return b ? a / b : 0;")]))
        .respond(fix_response(90, &[("README.md", "# calc", "# calc\n\nSafe division.")]));
    let h = Harness::new(tracker, model).expect("harness");
    let first = h
        .agent
        .analyze_issue(7)
        .await
        .expect("analyze 7")
        .proposal
        .expect("proposal 7");
    let second = h
        .agent
        .analyze_issue(8)
        .await
        .expect("analyze 8")
        .proposal
        .expect("proposal 8");

    let (a, b) = tokio::join!(h.agent.approve(&first.id), h.agent.approve(&second.id));
    let a = a.expect("approve 7");
    let b = b.expect("approve 8");

    for (outcome, subject) in [(&a, "fix: update src/math.ts"), (&b, "fix: update README.md")] {
        let branch = outcome.proposal.branch.as_deref().expect("branch");
        assert_eq!(
            remote.subjects_since_main(branch).expect("log"),
            vec![subject.to_string()]
        );
    }
    assert_eq!(h.tracker.pull_requests().len(), 2);
}
