//! Agent configuration stored in `fixbot.toml`, plus secrets from the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::context::ContextLimits;

pub const DEFAULT_CONFIG_FILE: &str = "fixbot.toml";

/// Agent configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that work against github.com with a local checkout directory.
/// Credentials never live here; see [`Secrets`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixbotConfig {
    pub server: ServerConfig,
    pub github: GithubConfig,
    pub llm: LlmConfig,
    pub mail: MailConfig,
    pub context: ContextLimits,
    pub validation: ValidationConfig,
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Base URL used in approve/reject links sent by mail.
    pub public_url: String,
    /// Seconds between background scans; 0 disables scanning.
    pub scan_interval_secs: u64,
    /// Repositories (`owner/name`) scanned on each interval.
    pub scan_repos: Vec<String>,
    pub scan_labels: Vec<String>,
    pub scan_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
            scan_interval_secs: 0,
            scan_repos: Vec::new(),
            scan_labels: vec!["bug".to_string()],
            scan_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MailConfig {
    /// SMTP relay host. When unset, notices are only logged.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub from: String,
    pub to: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            from: "fixbot <fixbot@localhost>".to_string(),
            to: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Explicit argv per stage; overrides detection when set.
    pub lint_command: Option<Vec<String>>,
    pub build_command: Option<Vec<String>>,
    pub test_command: Option<Vec<String>>,
    pub lint_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub install_timeout_secs: u64,
    /// Truncate captured stage output beyond this many bytes per stream.
    pub output_limit_bytes: usize,
    /// Run `npm install` when `package.json` exists but `node_modules` does not.
    pub install_dependencies: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            lint_command: None,
            build_command: None,
            test_command: None,
            lint_timeout_secs: 2 * 60,
            build_timeout_secs: 5 * 60,
            test_timeout_secs: 10 * 60,
            install_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            install_dependencies: true,
        }
    }
}

impl ValidationConfig {
    pub fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding one checkout per repository (`<root>/<owner>/<name>`).
    pub root: PathBuf,
    pub author_name: String,
    pub author_email: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".fixbot/checkouts"),
            author_name: "fixbot".to_string(),
            author_email: "fixbot@users.noreply.github.com".to_string(),
        }
    }
}

impl FixbotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.trim().is_empty() {
            return Err(anyhow!("server.bind must not be empty"));
        }
        if self.server.public_url.trim().is_empty() {
            return Err(anyhow!("server.public_url must not be empty"));
        }
        if self.server.scan_limit == 0 {
            return Err(anyhow!("server.scan_limit must be > 0"));
        }
        if self.github.request_timeout_secs == 0 {
            return Err(anyhow!("github.request_timeout_secs must be > 0"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow!("llm.model must not be empty"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(anyhow!("llm.max_tokens must be > 0"));
        }
        if self.mail.smtp_host.is_some() && self.mail.to.is_empty() {
            return Err(anyhow!("mail.to must list a recipient when mail.smtp_host is set"));
        }
        self.context.validate()?;
        let v = &self.validation;
        for (name, secs) in [
            ("lint_timeout_secs", v.lint_timeout_secs),
            ("build_timeout_secs", v.build_timeout_secs),
            ("test_timeout_secs", v.test_timeout_secs),
            ("install_timeout_secs", v.install_timeout_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("validation.{name} must be > 0"));
            }
        }
        if v.output_limit_bytes == 0 {
            return Err(anyhow!("validation.output_limit_bytes must be > 0"));
        }
        for (name, cmd) in [
            ("lint_command", &v.lint_command),
            ("build_command", &v.build_command),
            ("test_command", &v.test_command),
        ] {
            if let Some(cmd) = cmd
                && cmd.first().is_none_or(|p| p.trim().is_empty())
            {
                return Err(anyhow!("validation.{name} must be a non-empty array"));
            }
        }
        if self.workspace.root.as_os_str().is_empty() {
            return Err(anyhow!("workspace.root must not be empty"));
        }
        Ok(())
    }
}

/// Credentials read from the environment (and `.env`), never from TOML.
#[derive(Clone, Default)]
pub struct Secrets {
    pub github_token: Option<String>,
    pub llm_api_key: Option<String>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("github_token", &shown(&self.github_token))
            .field("llm_api_key", &shown(&self.llm_api_key))
            .field("smtp_user", &shown(&self.smtp_user))
            .field("smtp_password", &shown(&self.smtp_password))
            .finish()
    }
}

impl Secrets {
    /// Load `.env` if present, then read the credential variables.
    pub fn from_env() -> Self {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();
        Self {
            github_token: non_empty_var("GITHUB_TOKEN"),
            llm_api_key: non_empty_var("LLM_API_KEY"),
            smtp_user: non_empty_var("SMTP_USER"),
            smtp_password: non_empty_var("SMTP_PASSWORD"),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixbotConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixbotConfig> {
    if !path.exists() {
        let cfg = FixbotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixbotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixbotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FixbotConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixbot.toml");
        let mut cfg = FixbotConfig::default();
        cfg.validation.test_command = Some(vec!["make".to_string(), "check".to_string()]);
        cfg.mail.smtp_host = Some("smtp.example.com".to_string());
        cfg.mail.to = vec!["dev@example.com".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixbot.toml");
        fs::write(&path, "[server]\nport = 8080\n\n[context]\nmax_files = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.context.max_files, 5);
        assert_eq!(cfg.context.truncate_threshold, 3000);
        assert_eq!(cfg.validation.test_timeout_secs, 600);
    }

    #[test]
    fn rejects_empty_stage_command() {
        let mut cfg = FixbotConfig::default();
        cfg.validation.lint_command = Some(Vec::new());
        let err = cfg.validate().expect_err("empty command");
        assert!(err.to_string().contains("lint_command"));
    }

    #[test]
    fn rejects_smtp_without_recipients() {
        let mut cfg = FixbotConfig::default();
        cfg.mail.smtp_host = Some("smtp.example.com".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn secrets_debug_hides_values() {
        let secrets = Secrets {
            github_token: Some("ghp_secret".to_string()),
            ..Secrets::default()
        };
        let shown = format!("{secrets:?}");
        assert!(!shown.contains("ghp_secret"));
        assert!(shown.contains("<set>"));
    }
}
