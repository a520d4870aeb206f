//! Per-repository checkouts used by the apply pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::repo_ref::RepoRef;
use crate::io::git::Git;

/// Directory holding the checkout for `repo` under `root`.
pub fn checkout_dir(root: &Path, repo: &RepoRef) -> PathBuf {
    root.join(&repo.owner).join(&repo.name)
}

/// Bring the checkout to a clean copy of `origin/<default_branch>`.
///
/// Clones on first use; afterwards fetches, resets the default branch to the
/// remote, and removes untracked files left by an earlier attempt.
#[instrument(skip_all, fields(dir = %git.workdir().display(), default_branch))]
pub fn prepare_checkout(git: &Git, clone_url: &str, default_branch: &str) -> Result<()> {
    let dir = git.workdir();
    if dir.join(".git").exists() {
        git.set_remote_url("origin", clone_url)?;
        git.fetch("origin")?;
    } else {
        if dir.exists() {
            // Leftover from an interrupted clone.
            fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        git.clone_from(clone_url)?;
        info!("cloned repository");
    }
    let upstream = format!("origin/{default_branch}");
    git.checkout_reset(default_branch, Some(&upstream))?;
    git.discard_changes()?;
    Ok(())
}
