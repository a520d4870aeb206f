//! Prompt rendering for the proposal generator.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::Issue;
use crate::io::llm::ChatMessage;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const ANALYZE_TEMPLATE: &str = include_str!("prompts/analyze.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("analyze", ANALYZE_TEMPLATE)
            .expect("analyze template should be valid");
        Self { env }
    }

    fn render_system(&self) -> Result<String> {
        Ok(self.env.get_template("system")?.render(context! {})?)
    }

    fn render_analyze(&self, issue: &Issue, repo_url: &str, repo_context: &str) -> Result<String> {
        let template = self.env.get_template("analyze")?;
        let rendered = template.render(context! {
            issue => issue,
            labels => issue.labels.iter().collect::<Vec<_>>(),
            body => issue.body.trim(),
            repo_url => repo_url,
            context => repo_context.trim(),
        })?;
        Ok(rendered)
    }
}

/// The system + user message pair sent to the model for one issue.
pub fn analysis_messages(
    issue: &Issue,
    repo_url: &str,
    repo_context: &str,
) -> Result<Vec<ChatMessage>> {
    let engine = PromptEngine::new();
    Ok(vec![
        ChatMessage::system(engine.render_system()?),
        ChatMessage::user(engine.render_analyze(issue, repo_url, repo_context)?),
    ])
}
