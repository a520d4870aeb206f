//! Per-repository agent: one tracker, one proposal store, one checkout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::core::repo_ref::RepoRef;
use crate::core::types::{FixProposal, Issue};
use crate::io::config::FixbotConfig;
use crate::io::git::{Git, Identity};
use crate::io::llm::LanguageModel;
use crate::io::mailer::Notifier;
use crate::io::tracker::Tracker;
use crate::io::validation::ValidationGate;
use crate::io::workspace::checkout_dir;
use crate::store::ProposalStore;

/// Everything the pipeline needs for one repository.
///
/// The working-tree lock is held from checkout preparation until the branch
/// push finishes, so approvals on the same repository never interleave.
pub struct RepoAgent {
    pub(crate) repo: RepoRef,
    pub(crate) tracker: Arc<dyn Tracker>,
    pub(crate) model: Arc<dyn LanguageModel>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: Arc<FixbotConfig>,
    pub(crate) store: ProposalStore,
    pub(crate) tree_lock: tokio::sync::Mutex<()>,
    /// Issue number -> `updated_at` of the snapshot last analyzed by a scan.
    pub(crate) analyzed: Mutex<HashMap<u64, DateTime<Utc>>>,
    checkout: PathBuf,
}

impl RepoAgent {
    pub fn new(
        repo: RepoRef,
        tracker: Arc<dyn Tracker>,
        model: Arc<dyn LanguageModel>,
        notifier: Arc<dyn Notifier>,
        config: Arc<FixbotConfig>,
    ) -> Self {
        let checkout = checkout_dir(&config.workspace.root, &repo);
        Self {
            repo,
            tracker,
            model,
            notifier,
            config,
            store: ProposalStore::new(),
            tree_lock: tokio::sync::Mutex::new(()),
            analyzed: Mutex::new(HashMap::new()),
            checkout,
        }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.tracker
    }

    pub fn checkout(&self) -> &Path {
        &self.checkout
    }

    pub fn get(&self, id: &str) -> Option<FixProposal> {
        self.store.get(id)
    }

    pub fn list_pending(&self) -> Vec<FixProposal> {
        self.store.list_pending()
    }

    /// Context bundle for `issue`, as sent to the model.
    pub async fn context(&self, issue: Option<&Issue>) -> String {
        crate::context::assemble(self.tracker.as_ref(), issue, &self.config.context).await
    }

    pub(crate) fn git(&self) -> Git {
        Git::new(&self.checkout).with_identity(Identity {
            name: self.config.workspace.author_name.clone(),
            email: self.config.workspace.author_email.clone(),
        })
    }

    pub(crate) fn gate(&self) -> ValidationGate {
        ValidationGate::new(self.config.validation.clone())
    }

    pub(crate) fn mark_analyzed(&self, issue: &Issue) {
        self.analyzed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(issue.number, issue.updated_at);
    }

    /// True when this exact issue snapshot was already analyzed.
    pub(crate) fn already_analyzed(&self, issue: &Issue) -> bool {
        self.analyzed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&issue.number)
            .is_some_and(|seen| *seen >= issue.updated_at)
    }
}
