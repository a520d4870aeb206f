//! Applies a proposal's code changes to a checkout, one commit per change.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::core::pr_body::commit_message;
use crate::core::types::CodeChange;
use crate::io::git::Git;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("original code not found in {path}")]
    Conflict { path: String },
    #[error("refusing to write outside the repository: {path}")]
    InvalidPath { path: String },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git: {0:#}")]
    Git(anyhow::Error),
}

/// Resolve a repository-relative path, rejecting anything that could escape `root`.
pub fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, PatchError> {
    let invalid = || PatchError::InvalidPath {
        path: relative.to_string(),
    };
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                if depth == 0 && part == ".git" {
                    return Err(invalid());
                }
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid());
            }
        }
    }
    if depth == 0 {
        return Err(invalid());
    }
    Ok(resolved)
}

/// Apply one change to the file system. Nothing is written when the change conflicts.
pub fn apply_change(root: &Path, change: &CodeChange) -> Result<PathBuf, PatchError> {
    let target = resolve_path(root, &change.file_path)?;
    let io_err = |source: std::io::Error| PatchError::Io {
        path: change.file_path.clone(),
        source,
    };
    let updated = if change.creates_file() {
        change.new_code.clone()
    } else {
        let current = match fs::read_to_string(&target) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(io_err(err)),
        };
        if !current.contains(&change.original_code) {
            return Err(PatchError::Conflict {
                path: change.file_path.clone(),
            });
        }
        current.replacen(&change.original_code, &change.new_code, 1)
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(&target, updated).map_err(io_err)?;
    Ok(target)
}

/// Check out `branch` from the current HEAD and commit each change in order.
///
/// Stops at the first failure; commits already made are left in place.
/// Returns the number of commits created.
#[instrument(skip_all, fields(branch, changes = changes.len()))]
pub fn apply_changes(git: &Git, branch: &str, changes: &[CodeChange]) -> Result<usize, PatchError> {
    git.checkout_reset(branch, None).map_err(PatchError::Git)?;
    let mut commits = 0;
    for change in changes {
        apply_change(git.workdir(), change)?;
        git.add_path(&change.file_path).map_err(PatchError::Git)?;
        if git
            .commit_staged(&commit_message(change))
            .map_err(PatchError::Git)?
        {
            commits += 1;
        } else {
            debug!(path = %change.file_path, "change left the file unchanged");
        }
    }
    info!(commits, "changes applied");
    Ok(commits)
}
