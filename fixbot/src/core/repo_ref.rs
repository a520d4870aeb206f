//! Repository and issue references parsed from user input.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$").expect("slug regex")
});

static ISSUE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/issues/(\d+)/?(?:[?#].*)?$")
        .expect("issue url regex")
});

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`, `https://github.com/owner/name(.git)`, or `git@github.com:owner/name.git`.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let slug = if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
            rest
        } else if let Some(idx) = trimmed.find("github.com/") {
            &trimmed[idx + "github.com/".len()..]
        } else {
            trimmed
        };
        let caps = SLUG_RE.captures(slug)?;
        Some(Self::new(&caps[1], &caps[2]))
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn web_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse `https://github.com/<owner>/<repo>/issues/<n>`.
pub fn parse_issue_url(url: &str) -> Option<(RepoRef, u64)> {
    let caps = ISSUE_URL_RE.captures(url.trim())?;
    let number = caps[3].parse().ok()?;
    Some((RepoRef::new(&caps[1], &caps[2]), number))
}
