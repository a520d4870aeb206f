//! Repository context assembly over a [`Tracker`].

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::context::{
    CONFIG_FILES, CONTEXT_UNAVAILABLE, ContextLimits, clip, order_candidates, parse_listing,
    probe_dirs_present, referenced_files, render_block, source_files, truncate_middle,
};
use crate::core::types::Issue;
use crate::io::tracker::Tracker;

/// Build the context bundle for `issue` (or for the repository alone).
///
/// Never fails: individual fetch errors skip that file, and when nothing at
/// all can be gathered the result is [`CONTEXT_UNAVAILABLE`].
#[instrument(skip_all, fields(repo = %tracker.repo(), issue = issue.map(|i| i.number)))]
pub async fn assemble(tracker: &dyn Tracker, issue: Option<&Issue>, limits: &ContextLimits) -> String {
    match try_assemble(tracker, issue, limits).await {
        Ok(context) if !context.trim().is_empty() => context,
        Ok(_) => CONTEXT_UNAVAILABLE.to_string(),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "context assembly failed");
            CONTEXT_UNAVAILABLE.to_string()
        }
    }
}

async fn try_assemble(
    tracker: &dyn Tracker,
    issue: Option<&Issue>,
    limits: &ContextLimits,
) -> Result<String> {
    let mut blocks = Vec::new();

    for path in CONFIG_FILES {
        match tracker.get_file_content(path, None).await {
            Ok(Some(content)) => {
                blocks.push(render_block("Config", path, &clip(&content, limits.config_file_chars)));
            }
            Ok(None) => {}
            Err(err) => debug!(path, err = %err, "skipping config file"),
        }
    }

    let root_listing = match tracker.get_directory_listing("", None).await {
        Ok(listing) => listing,
        Err(err) => {
            warn!(err = %err, "root listing unavailable");
            String::new()
        }
    };
    if !root_listing.trim().is_empty() {
        blocks.push(render_block("Structure", "/", &root_listing));
    }

    let root_entries = parse_listing(&root_listing);
    let mut discovered = source_files(&root_entries);
    for dir in probe_dirs_present(&root_entries) {
        match tracker.get_directory_listing(&dir, None).await {
            Ok(listing) => discovered.extend(source_files(&parse_listing(&listing))),
            Err(err) => debug!(dir, err = %err, "skipping probe directory"),
        }
    }
    let referenced = issue
        .map(|i| referenced_files(&format!("{}\n{}", i.title, i.body)))
        .unwrap_or_default();

    let candidates = order_candidates(&referenced, &discovered, limits.max_files);
    debug!(
        referenced = referenced.len(),
        discovered = discovered.len(),
        candidates = candidates.len(),
        "context candidates"
    );
    for path in &candidates {
        match tracker.get_file_content(path, None).await {
            Ok(Some(content)) => {
                blocks.push(render_block("File", path, &truncate_middle(&content, limits)));
            }
            Ok(None) => debug!(path, "candidate file not found"),
            Err(err) => debug!(path, err = %err, "skipping candidate file"),
        }
    }

    Ok(blocks.join("\n"))
}
