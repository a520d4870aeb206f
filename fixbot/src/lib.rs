//! Issue-fixing agent: turns tracker issues into reviewed pull requests.
//!
//! The pipeline reads an issue, assembles repository context, asks a language
//! model for a fix, and waits for a human to approve it by mail. Approval
//! applies the change on a branch, runs lint/build/test, and opens a PR.
//!
//! - **[`core`]**: Pure, deterministic logic (context selection, response
//!   parsing, lifecycle rules, PR text). No I/O.
//! - **[`io`]**: Side-effecting adapters (git, subprocesses, GitHub, the model
//!   API, SMTP, config files), behind traits where tests need fakes.
//!
//! Orchestration lives in [`agent`], [`analyze`], [`approve`], [`scan`], and
//! [`registry`], which hands out one [`agent::RepoAgent`] per repository.

pub mod agent;
pub mod analyze;
pub mod approve;
pub mod context;
pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod registry;
pub mod scan;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::AgentError;
