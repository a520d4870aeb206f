//! Lint/build/test gate run against a patched checkout.
//!
//! Each stage resolves a command (explicit config, `package.json` scripts,
//! framework config files, then ecosystem manifests), runs it with its own
//! timeout, and stops the gate at the first failure. A stage with no command
//! passes vacuously.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::failure_scan::find_failure_marker;
use crate::core::types::{Stage, TestResult, ValidationReport};
use crate::io::config::ValidationConfig;
use crate::io::process::{command_in, run_command_with_timeout};

const CHECK_STAGES: [Stage; 3] = [Stage::Lint, Stage::Build, Stage::Test];

/// Runs the validation stages with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    config: ValidationConfig,
}

impl ValidationGate {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Run install (when needed) then lint, build, and test in `dir`.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn validate(&self, dir: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.needs_install(dir) {
            let argv = argv(&["npm", "install"]);
            let result = self.run_stage(dir, Stage::Install, &argv);
            let passed = result.passed;
            report.stages.push(result);
            if !passed {
                return report;
            }
        }
        for stage in CHECK_STAGES {
            let result = match self.command_for(dir, stage) {
                Some(argv) => self.run_stage(dir, stage, &argv),
                None => TestResult {
                    stage,
                    passed: true,
                    output: format!("no {stage} command detected"),
                    error: None,
                    duration_ms: 0,
                },
            };
            let passed = result.passed;
            report.stages.push(result);
            if !passed {
                warn!(%stage, "validation stage failed");
                return report;
            }
        }
        info!(stages = report.stages.len(), "validation passed");
        report
    }

    /// Command for `stage` in `dir`, if any.
    pub fn command_for(&self, dir: &Path, stage: Stage) -> Option<Vec<String>> {
        let configured = match stage {
            Stage::Lint => &self.config.lint_command,
            Stage::Build => &self.config.build_command,
            Stage::Test => &self.config.test_command,
            Stage::Install => &None,
        };
        configured.clone().or_else(|| detect_command(dir, stage))
    }

    fn needs_install(&self, dir: &Path) -> bool {
        self.config.install_dependencies
            && dir.join("package.json").is_file()
            && !dir.join("node_modules").exists()
    }

    fn timeout_for(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Install => self.config.install_timeout(),
            Stage::Lint => self.config.lint_timeout(),
            Stage::Build => self.config.build_timeout(),
            Stage::Test => self.config.test_timeout(),
        }
    }

    #[instrument(skip_all, fields(stage = %stage, command = %argv.join(" ")))]
    fn run_stage(&self, dir: &Path, stage: Stage, argv: &[String]) -> TestResult {
        let timeout = self.timeout_for(stage);
        let outcome = command_in(dir, argv).and_then(|cmd| {
            run_command_with_timeout(cmd, timeout, self.config.output_limit_bytes)
        });
        let out = match outcome {
            Ok(out) => out,
            Err(err) => {
                return TestResult {
                    stage,
                    passed: false,
                    output: String::new(),
                    error: Some(format!("{err:#}")),
                    duration_ms: 0,
                };
            }
        };
        let output = out.combined();
        let duration_ms = out.duration.as_millis() as u64;
        let error = if out.timed_out {
            Some(format!("{stage} timed out after {}s", timeout.as_secs()))
        } else if !out.status.success() {
            Some(match out.status.code() {
                Some(code) => format!("{stage} exited with code {code}"),
                None => format!("{stage} terminated by signal"),
            })
        } else if stage == Stage::Test {
            find_failure_marker(&output)
                .map(|marker| format!("test output reports failures ({marker})"))
        } else {
            None
        };
        TestResult {
            stage,
            passed: error.is_none(),
            output,
            error,
            duration_ms,
        }
    }
}

/// Detect a command from files in `dir`, without consulting config.
pub fn detect_command(dir: &Path, stage: Stage) -> Option<Vec<String>> {
    let script = match stage {
        Stage::Lint => "lint",
        Stage::Build => "build",
        Stage::Test => "test",
        Stage::Install => return None,
    };
    if package_scripts(dir).is_ok_and(|scripts| scripts.iter().any(|s| s == script)) {
        return Some(argv(&["npm", "run", script]));
    }
    if stage == Stage::Test
        && let Some(cmd) = detect_test_framework(dir)
    {
        return Some(cmd);
    }
    if dir.join("Cargo.toml").is_file() {
        let sub = match stage {
            Stage::Lint => "clippy",
            Stage::Build => "build",
            _ => "test",
        };
        return Some(argv(&["cargo", sub]));
    }
    if dir.join("go.mod").is_file() {
        let sub = match stage {
            Stage::Lint => "vet",
            Stage::Build => "build",
            _ => "test",
        };
        return Some(argv(&["go", sub, "./..."]));
    }
    None
}

fn detect_test_framework(dir: &Path) -> Option<Vec<String>> {
    let names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    if names.iter().any(|n| n.starts_with("jest.config.")) {
        return Some(argv(&["npx", "jest"]));
    }
    if names.iter().any(|n| n.starts_with("vitest.config.")) {
        return Some(argv(&["npx", "vitest", "run"]));
    }
    if names.iter().any(|n| n == "pytest.ini" || n == "conftest.py") {
        return Some(argv(&["pytest"]));
    }
    None
}

/// Script names declared in `package.json`.
fn package_scripts(dir: &Path) -> Result<Vec<String>> {
    let path = dir.join("package.json");
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(json
        .get("scripts")
        .and_then(|s| s.as_object())
        .map(|scripts| scripts.keys().cloned().collect())
        .unwrap_or_default())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).expect("write");
    }

    #[test]
    fn package_scripts_win_over_manifests() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "package.json", r#"{"scripts":{"lint":"eslint .","test":"jest"}}"#);
        write(temp.path(), "Cargo.toml", "[package]\n");
        assert_eq!(
            detect_command(temp.path(), Stage::Lint),
            Some(argv(&["npm", "run", "lint"]))
        );
        assert_eq!(
            detect_command(temp.path(), Stage::Build),
            Some(argv(&["cargo", "build"]))
        );
    }

    #[test]
    fn test_framework_configs_detected() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "vitest.config.ts", "");
        assert_eq!(
            detect_command(temp.path(), Stage::Test),
            Some(argv(&["npx", "vitest", "run"]))
        );
        assert_eq!(detect_command(temp.path(), Stage::Lint), None);

        let py = tempfile::tempdir().expect("tempdir");
        write(py.path(), "conftest.py", "");
        assert_eq!(detect_command(py.path(), Stage::Test), Some(argv(&["pytest"])));
    }

    #[test]
    fn go_module_commands() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "go.mod", "module x\n");
        assert_eq!(
            detect_command(temp.path(), Stage::Lint),
            Some(argv(&["go", "vet", "./..."]))
        );
    }

    #[test]
    fn nothing_detected_passes_vacuously() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = ValidationGate::new(ValidationConfig::default()).validate(temp.path());
        assert!(report.passed());
        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.stages[0].output, "no lint command detected");
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Option<Vec<String>> {
        Some(argv(&["sh", "-c", script]))
    }

    #[cfg(unix)]
    #[test]
    fn lint_failure_short_circuits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ValidationConfig {
            lint_command: sh("echo bad style; exit 1"),
            build_command: sh("touch built"),
            test_command: sh("touch tested"),
            ..ValidationConfig::default()
        };
        let report = ValidationGate::new(config).validate(temp.path());
        assert!(!report.passed());
        assert_eq!(report.stages.len(), 1);
        let failure = report.failure().expect("failure");
        assert_eq!(failure.stage, Stage::Lint);
        assert!(failure.output.contains("bad style"));
        assert!(!temp.path().join("built").exists());
        assert!(!temp.path().join("tested").exists());
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_with_failure_markers_fails_test_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ValidationConfig {
            lint_command: sh("echo '1 failed'"),
            test_command: sh("echo 'Tests: 1 failed, 3 passed'"),
            ..ValidationConfig::default()
        };
        let report = ValidationGate::new(config).validate(temp.path());
        assert_eq!(report.stages[0].stage, Stage::Lint);
        assert!(report.stages[0].passed, "markers only apply to tests");
        let failure = report.failure().expect("failure");
        assert_eq!(failure.stage, Stage::Test);
        assert!(failure.error.as_deref().unwrap_or_default().contains("failures"));
    }

    #[cfg(unix)]
    #[test]
    fn stage_timeout_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ValidationConfig {
            build_command: sh("sleep 5"),
            build_timeout_secs: 1,
            ..ValidationConfig::default()
        };
        let report = ValidationGate::new(config).validate(temp.path());
        let failure = report.failure().expect("failure");
        assert_eq!(failure.stage, Stage::Build);
        assert!(failure.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[test]
    fn missing_binary_is_a_failed_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ValidationConfig {
            lint_command: Some(argv(&["fixbot-definitely-not-a-binary"])),
            ..ValidationConfig::default()
        };
        let report = ValidationGate::new(config).validate(temp.path());
        assert!(!report.passed());
        assert!(report.stages[0].error.is_some());
    }
}
