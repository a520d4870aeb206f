//! Deterministic pieces of repository-context assembly.
//!
//! Selection of candidate files, issue-reference extraction, and truncation
//! live here so they can be tested without a tracker. Fetching happens in
//! [`crate::context`].

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Well-known config/manifest files included ahead of source files.
pub const CONFIG_FILES: &[&str] = &[
    "README.md",
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
    "tsconfig.json",
];

/// Conventional source directories probed one level deep.
pub const PROBE_DIRS: &[&str] = &[
    "src",
    "lib",
    "app",
    "api",
    "core",
    "models",
    "controllers",
    "handlers",
];

/// Extensions treated as source code when discovering candidates.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs", "go", "java", "kt", "rb", "php", "cs",
    "c", "cc", "cpp", "h", "hpp", "swift", "vue", "svelte",
];

/// Extra extensions recognized only when an issue names the file explicitly.
const REFERENCE_ONLY_EXTENSIONS: &[&str] = &[
    "json", "toml", "yaml", "yml", "css", "scss", "html", "sql", "sh",
];

/// Returned by the assembler when nothing could be fetched at all.
pub const CONTEXT_UNAVAILABLE: &str = "Repository context unavailable.";

/// Bounds on the context bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextLimits {
    /// Maximum number of source files fetched.
    pub max_files: usize,
    /// Characters kept from each config/manifest file.
    pub config_file_chars: usize,
    /// Source files longer than this are cut down to head + tail.
    pub truncate_threshold: usize,
    pub head_chars: usize,
    pub tail_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_files: 15,
            config_file_chars: 2000,
            truncate_threshold: 3000,
            head_chars: 2000,
            tail_chars: 800,
        }
    }
}

impl ContextLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_files == 0 {
            return Err(anyhow!("context.max_files must be > 0"));
        }
        if self.config_file_chars == 0 {
            return Err(anyhow!("context.config_file_chars must be > 0"));
        }
        if self.head_chars + self.tail_chars >= self.truncate_threshold {
            return Err(anyhow!(
                "context.head_chars + context.tail_chars must be < context.truncate_threshold"
            ));
        }
        Ok(())
    }
}

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

/// One `type:path` line of a tracker directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub kind: EntryKind,
    pub path: String,
}

/// Parse a newline-separated `dir:path` / `file:path` listing. Unknown lines are ignored.
pub fn parse_listing(listing: &str) -> Vec<ListingEntry> {
    listing
        .lines()
        .filter_map(|line| {
            let (kind, path) = line.trim().split_once(':')?;
            let kind = match kind {
                "dir" => EntryKind::Dir,
                "file" => EntryKind::File,
                _ => return None,
            };
            let path = path.trim();
            (!path.is_empty()).then(|| ListingEntry {
                kind,
                path: path.to_string(),
            })
        })
        .collect()
}

/// Source files named in a listing, in listing order.
pub fn source_files(entries: &[ListingEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.kind == EntryKind::File && has_source_extension(&e.path))
        .map(|e| e.path.clone())
        .collect()
}

/// Probe directories that actually exist in a root listing.
pub fn probe_dirs_present(root: &[ListingEntry]) -> Vec<String> {
    PROBE_DIRS
        .iter()
        .filter(|dir| {
            root.iter()
                .any(|e| e.kind == EntryKind::Dir && e.path.trim_end_matches('/') == **dir)
        })
        .map(|dir| dir.to_string())
        .collect()
}

pub fn has_source_extension(path: &str) -> bool {
    extension(path).is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext)
}

fn reference_extension_pattern() -> String {
    let mut exts: Vec<&str> = SOURCE_EXTENSIONS
        .iter()
        .chain(REFERENCE_ONLY_EXTENSIONS)
        .copied()
        .collect();
    // Longest first so `tsx` is tried before `ts`.
    exts.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    exts.join("|")
}

static BACKTICK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"`([^`\s]+\.(?:{}))`",
        reference_extension_pattern()
    ))
    .expect("backtick reference regex should compile")
});

static BARE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?:^|[\s(\["'])((?:\./)?(?:[\w.-]+/)+[\w.-]+\.(?:{}))\b"#,
        reference_extension_pattern()
    ))
    .expect("bare path regex should compile")
});

/// Files referenced in issue text, either backtick-quoted or as bare `dir/file.ext` paths.
///
/// Results are deduplicated and keep first-mention order.
pub fn referenced_files(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let backticked = BACKTICK_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()));
    let bare = BARE_PATH_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()));
    for raw in backticked.chain(bare) {
        let path = raw.trim_start_matches("./").trim_start_matches('/');
        if path.is_empty() || path.contains("..") {
            continue;
        }
        if seen.insert(path.to_string()) {
            out.push(path.to_string());
        }
    }
    out
}

/// Merge candidate lists: issue references first, then discovered files, deduplicated and capped.
pub fn order_candidates(referenced: &[String], discovered: &[String], max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    referenced
        .iter()
        .chain(discovered)
        .filter(|p| seen.insert(p.as_str()))
        .take(max)
        .cloned()
        .collect()
}

/// Keep the first `max_chars` characters of a config file.
pub fn clip(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n... [truncated]", &content[..idx]),
        None => content.to_string(),
    }
}

/// Cut long files down to a head and tail slice around an explicit truncation marker.
pub fn truncate_middle(content: &str, limits: &ContextLimits) -> String {
    let total = content.chars().count();
    if total <= limits.truncate_threshold {
        return content.to_string();
    }
    let head: String = content.chars().take(limits.head_chars).collect();
    let tail: String = content.chars().skip(total - limits.tail_chars).collect();
    let omitted = total - limits.head_chars - limits.tail_chars;
    format!("{head}\n... [{omitted} characters truncated] ...\n{tail}")
}

/// Tag a block of content with its source path.
pub fn render_block(label: &str, path: &str, body: &str) -> String {
    format!("=== {label}: {path} ===\n{}\n", body.trim_end())
}
