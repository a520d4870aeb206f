//! Test doubles and fixtures for the fix pipeline.
//!
//! Enabled with the `test-support` feature. Everything here is in-memory
//! except [`TestRemote`], which builds a real bare git repository in a
//! temporary directory so the apply pipeline can clone and push to it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::agent::RepoAgent;
use crate::core::repo_ref::RepoRef;
use crate::core::types::{FixProposal, Issue, IssueState, PullRequest};
use crate::io::config::{FixbotConfig, ValidationConfig};
use crate::io::git::{Git, Identity};
use crate::io::llm::{ChatMessage, LanguageModel};
use crate::io::mailer::Notifier;
use crate::io::tracker::{Tracker, TrackerFactory};
use crate::registry::{AgentDeps, AgentRegistry};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deterministic open issue with the `bug` label.
pub fn issue(number: u64, title: &str, body: &str) -> Issue {
    let at = Utc
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    Issue {
        number,
        title: title.to_string(),
        body: body.to_string(),
        labels: ["bug".to_string()].into_iter().collect(),
        state: IssueState::Open,
        created_at: at,
        updated_at: at,
        author_login: "octocat".to_string(),
    }
}

/// A model answer proposing `changes` as `(path, original, new)` triples.
pub fn fix_response(confidence: u8, changes: &[(&str, &str, &str)]) -> String {
    let code_changes: Vec<_> = changes
        .iter()
        .map(|(path, original, new)| {
            json!({
                "filePath": path,
                "originalCode": original,
                "newCode": new,
                "explanation": format!("update {path}"),
            })
        })
        .collect();
    let body = json!({
        "shouldFix": true,
        "confidence": confidence,
        "reason": "the defect is visible in the provided context",
        "fix": {
            "title": "Guard empty input",
            "description": "Return early when the input is empty.",
            "codeChanges": code_changes,
        }
    });
    format!("Here is my analysis:\n```json\n{body:#}\n```\n")
}

/// A model answer declining to fix.
pub fn no_fix_response(confidence: u8, reason: &str) -> String {
    json!({ "shouldFix": false, "confidence": confidence, "reason": reason, "fix": null })
        .to_string()
}

/// Config rooted in `workspace_root`, with explicit no-op validation commands.
pub fn test_config(workspace_root: &Path) -> FixbotConfig {
    let mut config = FixbotConfig::default();
    config.workspace.root = workspace_root.to_path_buf();
    config.validation = ValidationConfig {
        lint_command: Some(vec!["true".to_string()]),
        build_command: Some(vec!["true".to_string()]),
        test_command: Some(vec!["true".to_string()]),
        install_dependencies: false,
        ..ValidationConfig::default()
    };
    config
}

/// A bare git remote seeded with one commit on `main`.
pub struct TestRemote {
    _temp: tempfile::TempDir,
    bare: PathBuf,
}

impl TestRemote {
    pub fn new(files: &[(&str, &str)]) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let bare = temp.path().join("remote.git");
        run_git(
            temp.path(),
            &["init", "--quiet", "--bare", "--initial-branch=main", "remote.git"],
        )?;

        let seed_dir = temp.path().join("seed");
        run_git(temp.path(), &["init", "--quiet", "--initial-branch=main", "seed"])?;
        run_git(&seed_dir, &["remote", "add", "origin", &bare.to_string_lossy()])?;
        let seed = Git::new(&seed_dir).with_identity(test_identity());
        for (path, contents) in files {
            let target = seed.workdir().join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, contents)?;
        }
        seed.add_all()?;
        seed.commit_staged("initial commit")?;
        seed.push_branch("origin", "main")?;
        Ok(Self { _temp: temp, bare })
    }

    pub fn url(&self) -> String {
        self.bare.to_string_lossy().to_string()
    }

    /// Contents of `path` on `branch`, if both exist.
    pub fn file_on(&self, branch: &str, path: &str) -> Option<String> {
        let out = self.git(&["show", &format!("{branch}:{path}")]).ok()?;
        Some(out)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .is_ok()
    }

    /// Commit subjects on `branch` that are not on `main`, oldest first.
    pub fn subjects_since_main(&self, branch: &str) -> Result<Vec<String>> {
        let out = self.git(&["log", "--reverse", "--format=%s", &format!("main..{branch}")])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .arg("--git-dir")
            .arg(&self.bare)
            .args(args)
            .output()
            .context("spawn git")?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .context("spawn git")?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(())
}

fn test_identity() -> Identity {
    Identity {
        name: "fixbot tests".to_string(),
        email: "tests@example.com".to_string(),
    }
}

#[derive(Default)]
struct FakeTrackerState {
    issues: BTreeMap<u64, Issue>,
    files: BTreeMap<String, String>,
    pull_requests: Vec<CreatedPullRequest>,
    branches: Vec<(String, String)>,
    comments: Vec<(u64, String)>,
    fail_pull_requests: bool,
    fail_listings: bool,
}

/// A pull request recorded by [`FakeTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// In-memory tracker. File contents serve context assembly; `clone_url` points at a real remote.
pub struct FakeTracker {
    repo: RepoRef,
    clone_url: String,
    state: Mutex<FakeTrackerState>,
}

impl FakeTracker {
    pub fn new(repo: RepoRef, clone_url: impl Into<String>) -> Self {
        Self {
            repo,
            clone_url: clone_url.into(),
            state: Mutex::new(FakeTrackerState::default()),
        }
    }

    pub fn with_issue(self, issue: Issue) -> Self {
        locked(&self.state).issues.insert(issue.number, issue);
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        locked(&self.state)
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub fn add_issue(&self, issue: Issue) {
        locked(&self.state).issues.insert(issue.number, issue);
    }

    pub fn fail_pull_requests(&self, fail: bool) {
        locked(&self.state).fail_pull_requests = fail;
    }

    pub fn fail_listings(&self, fail: bool) {
        locked(&self.state).fail_listings = fail;
    }

    pub fn pull_requests(&self) -> Vec<CreatedPullRequest> {
        locked(&self.state).pull_requests.clone()
    }

    /// `(name, base)` pairs passed to `create_branch`.
    pub fn created_branches(&self) -> Vec<(String, String)> {
        locked(&self.state).branches.clone()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        locked(&self.state).comments.clone()
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    fn repo(&self) -> &RepoRef {
        &self.repo
    }

    async fn list_issues(&self, labels: &[String], limit: usize) -> Result<Vec<Issue>> {
        let state = locked(&self.state);
        Ok(state
            .issues
            .values()
            .rev()
            .filter(|i| i.state == IssueState::Open && labels.iter().all(|l| i.labels.contains(l)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_issue(&self, number: u64) -> Result<Issue> {
        locked(&self.state)
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("issue #{number} not found"))
    }

    async fn get_file_content(&self, path: &str, _git_ref: Option<&str>) -> Result<Option<String>> {
        Ok(locked(&self.state).files.get(path).cloned())
    }

    async fn get_directory_listing(&self, path: &str, _git_ref: Option<&str>) -> Result<String> {
        let state = locked(&self.state);
        if state.fail_listings {
            return Err(anyhow!("listing unavailable"));
        }
        let prefix = match path.trim_matches('/') {
            "" => String::new(),
            dir => format!("{dir}/"),
        };
        let mut entries: BTreeMap<String, &str> = BTreeMap::new();
        for file in state.files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => entries.insert(format!("{prefix}{dir}"), "dir"),
                None => entries.insert(file.clone(), "file"),
            };
        }
        Ok(entries
            .into_iter()
            .map(|(path, kind)| format!("{kind}:{path}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn get_default_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<()> {
        locked(&self.state)
            .branches
            .push((name.to_string(), base.to_string()));
        Ok(())
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest> {
        let mut state = locked(&self.state);
        if state.fail_pull_requests {
            return Err(anyhow!("pull request creation rejected"));
        }
        let number = 100 + state.pull_requests.len() as u64;
        state.pull_requests.push(CreatedPullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        Ok(PullRequest {
            number,
            url: format!("{}/pull/{number}", self.repo.web_url()),
        })
    }

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<()> {
        locked(&self.state).comments.push((number, body.to_string()));
        Ok(())
    }

    fn clone_url(&self) -> String {
        self.clone_url.clone()
    }

    fn repo_url(&self) -> String {
        self.repo.web_url()
    }
}

/// Hands out pre-registered fake trackers.
#[derive(Default)]
pub struct FakeTrackerFactory {
    trackers: Mutex<HashMap<RepoRef, Arc<FakeTracker>>>,
}

impl FakeTrackerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tracker: Arc<FakeTracker>) {
        locked(&self.trackers).insert(tracker.repo().clone(), tracker);
    }
}

impl TrackerFactory for FakeTrackerFactory {
    fn tracker_for(&self, repo: &RepoRef) -> Result<Arc<dyn Tracker>> {
        let tracker: Arc<dyn Tracker> = locked(&self.trackers)
            .get(repo)
            .cloned()
            .ok_or_else(|| anyhow!("no tracker registered for {repo}"))?;
        Ok(tracker)
    }
}

/// Model that replays scripted answers in order and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: impl Into<String>) -> Self {
        locked(&self.responses).push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        locked(&self.responses).push_back(Err(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        locked(&self.requests).push(messages.to_vec());
        // Let concurrent callers interleave like a real network round trip.
        tokio::task::yield_now().await;
        match locked(&self.responses).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

/// Notice captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ValidationRequest {
        id: String,
        repo_url: String,
    },
    NoFix {
        issue: u64,
        reason: String,
    },
    Outcome {
        id: String,
        pr_url: Option<String>,
        success: bool,
        detail: Option<String>,
    },
}

/// Notifier that records notices instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    fail_validation_requests: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_validation_requests(&self, fail: bool) {
        *locked(&self.fail_validation_requests) = fail;
    }

    pub fn notices(&self) -> Vec<Notice> {
        locked(&self.notices).clone()
    }

    pub fn outcomes(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| matches!(n, Notice::Outcome { .. }))
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_validation_request(&self, proposal: &FixProposal, repo_url: &str) -> Result<()> {
        if *locked(&self.fail_validation_requests) {
            return Err(anyhow!("smtp relay unavailable"));
        }
        locked(&self.notices).push(Notice::ValidationRequest {
            id: proposal.id.clone(),
            repo_url: repo_url.to_string(),
        });
        Ok(())
    }

    async fn send_no_fix_notice(&self, issue: &Issue, _repo_url: &str, reason: &str) -> Result<()> {
        locked(&self.notices).push(Notice::NoFix {
            issue: issue.number,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn send_outcome(
        &self,
        proposal: &FixProposal,
        pr_url: Option<&str>,
        success: bool,
        detail: Option<&str>,
    ) -> Result<()> {
        locked(&self.notices).push(Notice::Outcome {
            id: proposal.id.clone(),
            pr_url: pr_url.map(str::to_string),
            success,
            detail: detail.map(str::to_string),
        });
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        true
    }
}

/// A repository agent wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub agent: Arc<RepoAgent>,
    pub tracker: Arc<FakeTracker>,
    pub model: Arc<ScriptedModel>,
    pub notifier: Arc<RecordingNotifier>,
    pub workspace: tempfile::TempDir,
}

impl Harness {
    pub fn new(tracker: FakeTracker, model: ScriptedModel) -> Result<Self> {
        Self::with_config(tracker, model, |_| {})
    }

    /// Like [`Harness::new`], with a hook to adjust the config first.
    pub fn with_config(
        tracker: FakeTracker,
        model: ScriptedModel,
        adjust: impl FnOnce(&mut FixbotConfig),
    ) -> Result<Self> {
        let workspace = tempfile::tempdir().context("create workspace")?;
        let mut config = test_config(workspace.path());
        adjust(&mut config);
        let tracker = Arc::new(tracker);
        let model = Arc::new(model);
        let notifier = Arc::new(RecordingNotifier::new());
        let agent = Arc::new(RepoAgent::new(
            tracker.repo().clone(),
            tracker.clone(),
            model.clone(),
            notifier.clone(),
            Arc::new(config),
        ));
        Ok(Self {
            agent,
            tracker,
            model,
            notifier,
            workspace,
        })
    }
}

/// A registry backed by fakes, for exercising the HTTP surface.
pub struct RegistryHarness {
    pub registry: Arc<AgentRegistry>,
    pub trackers: Arc<FakeTrackerFactory>,
    pub model: Arc<ScriptedModel>,
    pub notifier: Arc<RecordingNotifier>,
    pub workspace: tempfile::TempDir,
}

impl RegistryHarness {
    pub fn new(model: ScriptedModel, trackers: Vec<FakeTracker>) -> Result<Self> {
        let workspace = tempfile::tempdir().context("create workspace")?;
        let factory = Arc::new(FakeTrackerFactory::new());
        for tracker in trackers {
            factory.register(Arc::new(tracker));
        }
        let model = Arc::new(model);
        let notifier = Arc::new(RecordingNotifier::new());
        let registry = Arc::new(AgentRegistry::new(AgentDeps {
            trackers: factory.clone(),
            model: model.clone(),
            notifier: notifier.clone(),
            config: Arc::new(test_config(workspace.path())),
        }));
        Ok(Self {
            registry,
            trackers: factory,
            model,
            notifier,
            workspace,
        })
    }
}
