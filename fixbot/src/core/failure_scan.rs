//! Heuristic scan of test output for failure markers.
//!
//! Some test runners exit 0 even when tests fail (watch modes, misconfigured
//! scripts). A zero exit code is only trusted when none of these markers appear.

use std::sync::LazyLock;

use regex::Regex;

static FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)(\b[1-9]\d*\s+(?:failed|failing)\b|test result:\s*FAILED|^Tests:.*\bfailed\b|^\s*FAIL\s|[✕✗]|\bAssertionError\b)",
    )
    .expect("failure marker regex")
});

/// First failure marker found in `output`, if any.
pub fn find_failure_marker(output: &str) -> Option<&str> {
    FAILURE_RE.find(output).map(|m| m.as_str().trim())
}
