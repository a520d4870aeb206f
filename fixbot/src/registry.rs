//! Registry of per-repository agents sharing one model and one notifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tracing::info;

use crate::agent::RepoAgent;
use crate::core::repo_ref::RepoRef;
use crate::error::AgentError;
use crate::io::config::{FixbotConfig, Secrets};
use crate::io::github::GithubTrackerFactory;
use crate::io::llm::{LanguageModel, OpenAiCompatibleModel};
use crate::io::mailer::{LogNotifier, Notifier, SmtpNotifier};
use crate::io::tracker::TrackerFactory;

/// Collaborators shared by every repository agent.
#[derive(Clone)]
pub struct AgentDeps {
    pub trackers: Arc<dyn TrackerFactory>,
    pub model: Arc<dyn LanguageModel>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<FixbotConfig>,
}

impl AgentDeps {
    /// Production collaborators: GitHub, an OpenAI-compatible model, and SMTP when configured.
    pub fn from_config(config: FixbotConfig, secrets: &Secrets) -> Result<Self> {
        let trackers = Arc::new(GithubTrackerFactory::new(
            config.github.clone(),
            secrets.github_token.clone(),
        ));
        let model = Arc::new(OpenAiCompatibleModel::new(
            config.llm.clone(),
            secrets.llm_api_key.clone(),
        )?);
        let notifier: Arc<dyn Notifier> = if config.mail.smtp_host.is_some() {
            Arc::new(SmtpNotifier::new(&config.mail, secrets, &config.server.public_url)?)
        } else {
            info!("mail.smtp_host not set, notices will only be logged");
            Arc::new(LogNotifier::new(config.server.public_url.clone()))
        };
        Ok(Self {
            trackers,
            model,
            notifier,
            config: Arc::new(config),
        })
    }
}

/// Lazily creates one [`RepoAgent`] per repository and keeps it for the process lifetime.
pub struct AgentRegistry {
    deps: AgentDeps,
    agents: Mutex<HashMap<RepoRef, Arc<RepoAgent>>>,
}

impl AgentRegistry {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FixbotConfig {
        &self.deps.config
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.deps.notifier
    }

    /// Agent for `repo`, created on first use.
    pub fn agent_for(&self, repo: &RepoRef) -> Result<Arc<RepoAgent>, AgentError> {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(agent) = agents.get(repo) {
            return Ok(Arc::clone(agent));
        }
        let tracker = self.deps.trackers.tracker_for(repo)?;
        let agent = Arc::new(RepoAgent::new(
            repo.clone(),
            tracker,
            Arc::clone(&self.deps.model),
            Arc::clone(&self.deps.notifier),
            Arc::clone(&self.deps.config),
        ));
        info!(repo = %repo, "registered repository agent");
        agents.insert(repo.clone(), Arc::clone(&agent));
        Ok(agent)
    }

    /// Parse `owner/name` (or a repository URL) and return its agent.
    pub fn agent_for_slug(&self, slug: &str) -> Result<Arc<RepoAgent>, AgentError> {
        let repo = RepoRef::parse(slug)
            .ok_or_else(|| AgentError::InvalidRequest(format!("invalid repository '{slug}'")))?;
        self.agent_for(&repo)
    }
}
