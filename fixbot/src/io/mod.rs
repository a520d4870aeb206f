//! Side-effecting adapters: subprocesses, git, HTTP clients, mail, and config files.

pub mod config;
pub mod git;
pub mod github;
pub mod llm;
pub mod mailer;
pub mod patch;
pub mod process;
pub mod prompt;
pub mod tracker;
pub mod validation;
pub mod workspace;
