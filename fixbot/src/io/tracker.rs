//! Issue tracker and code host seam.
//!
//! The pipeline only talks to the hosting service through [`Tracker`], so tests
//! can substitute an in-memory fake and a local bare repository.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::repo_ref::RepoRef;
use crate::core::types::{Issue, PullRequest};

#[async_trait]
pub trait Tracker: Send + Sync {
    fn repo(&self) -> &RepoRef;

    /// Open issues carrying all of `labels`, most recently created first.
    async fn list_issues(&self, labels: &[String], limit: usize) -> Result<Vec<Issue>>;

    async fn get_issue(&self, number: u64) -> Result<Issue>;

    /// File contents at `git_ref` (default branch when `None`); `Ok(None)` when absent.
    async fn get_file_content(&self, path: &str, git_ref: Option<&str>) -> Result<Option<String>>;

    /// Newline-separated `dir:path` / `file:path` entries for one directory level.
    async fn get_directory_listing(&self, path: &str, git_ref: Option<&str>) -> Result<String>;

    async fn get_default_branch(&self) -> Result<String>;

    /// Create branch `name` at the tip of `base`. An existing branch is not an error.
    async fn create_branch(&self, name: &str, base: &str) -> Result<()>;

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest>;

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<()>;

    /// URL (or local path) that `git clone` and `git push` can use, credentials included.
    fn clone_url(&self) -> String;

    /// Human-facing repository URL.
    fn repo_url(&self) -> String;
}

/// Builds one tracker per repository.
pub trait TrackerFactory: Send + Sync {
    fn tracker_for(&self, repo: &RepoRef) -> Result<Arc<dyn Tracker>>;
}
