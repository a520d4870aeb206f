//! Shared application state for the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use fixbot::agent::RepoAgent;
use fixbot::registry::AgentRegistry;
use tracing::{info, warn};

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Scan each agent's repository on a detached task.
    ///
    /// Failures are logged per repository; nothing is reported back to the caller.
    pub fn scan_in_background(&self, agents: Vec<Arc<RepoAgent>>, labels: Vec<String>, limit: usize) {
        tokio::spawn(async move {
            scan_agents(&agents, &labels, limit).await;
        });
    }

    /// Re-scan the configured repositories every `every`.
    pub fn spawn_periodic_scan(&self, every: Duration) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let server = &state.registry.config().server;
                let (repos, labels, limit) = (
                    server.scan_repos.clone(),
                    server.scan_labels.clone(),
                    server.scan_limit,
                );
                let mut agents = Vec::with_capacity(repos.len());
                for slug in &repos {
                    match state.registry.agent_for_slug(slug) {
                        Ok(agent) => agents.push(agent),
                        Err(err) => warn!(repo = %slug, err = %err, "skipping scan target"),
                    }
                }
                scan_agents(&agents, &labels, limit).await;
            }
        });
    }
}

async fn scan_agents(agents: &[Arc<RepoAgent>], labels: &[String], limit: usize) {
    for agent in agents {
        match agent.scan(labels, limit).await {
            Ok(summary) => info!(repo = %agent.repo(), ?summary, "scan complete"),
            Err(err) => warn!(repo = %agent.repo(), err = %err, "scan failed"),
        }
    }
}
