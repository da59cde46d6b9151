//! Change collection and path deduplication.
//!
//! The previous build is scanned first when it finished without success, so
//! file-level triggers from a failed run that nobody acted on get caught up.
//! Only one build of lookback is applied.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::FileCache;
use crate::host::{BuildRecord, BuildResult, ChangeSet, Entry, OutputSink, ScmKind};

/// The only SCM flavor whose entries contribute paths.
pub const RECOGNIZED_SCM: ScmKind = ScmKind::Git;

/// Whether `previous` should have its change sets scanned before the
/// current build's.
pub fn previous_qualifies(previous: &dyn BuildRecord) -> bool {
    !previous.is_running() && previous.result() != Some(BuildResult::Success)
}

/// Gather the change sets to scan, previous build first.
pub fn collect_change_sets(
    build: &dyn BuildRecord,
    sink: &dyn OutputSink,
) -> Vec<Arc<dyn ChangeSet>> {
    let mut sets = Vec::new();

    if let Some(previous) = build.previous() {
        if previous_qualifies(previous.as_ref()) {
            if let Some(scm) = previous.as_scm() {
                let result = previous
                    .result()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "UNKNOWN".to_string());
                sink.write_line(&format!(
                    "including changes from previous build {} (result {})",
                    previous.id(),
                    result
                ));
                let previous_sets = scm.change_sets();
                info!(
                    build = %previous.id(),
                    change_sets = previous_sets.len(),
                    "Scanning previous build"
                );
                sets.extend(previous_sets);
            }
        } else {
            debug!(build = %previous.id(), "Previous build skipped");
        }
    }

    match build.as_scm() {
        Some(scm) => sets.extend(scm.change_sets()),
        None => {
            sink.write_line(&format!("build {} does not expose change sets", build.id()));
            info!(build = %build.id(), "Build has no change-set capability");
        }
    }

    sets
}

/// Add the entry's unseen paths to `cache` and `discovered`.
///
/// Returns whether this entry contributed at least one new path.
pub fn scan_entry(
    entry: &dyn Entry,
    cache: &mut FileCache,
    sink: &dyn OutputSink,
    discovered: &mut Vec<String>,
) -> bool {
    let provider = match entry.affected_file_provider() {
        Some(p) if p.scm_kind() == RECOGNIZED_SCM => p,
        Some(p) => {
            sink.write_line(&format!("skipping {:?} entry", p.scm_kind()));
            return false;
        }
        None => {
            sink.write_line("skipping entry without affected files");
            return false;
        }
    };

    let files = match provider.affected_files() {
        Some(files) if !files.is_empty() => files,
        _ => return false,
    };

    let mut found = false;
    for file in files {
        if file.path.is_empty() {
            debug!("Ignoring affected file with empty path");
            continue;
        }
        if !cache.insert(&file.path) {
            continue;
        }
        sink.write_line(&file.path);
        discovered.push(file.path);
        found = true;
    }
    found
}

/// Flatten `sets` into newly discovered paths, in discovery order.
pub fn scan_change_sets(
    sets: &[Arc<dyn ChangeSet>],
    cache: &mut FileCache,
    sink: &dyn OutputSink,
) -> Vec<String> {
    let mut discovered = Vec::new();
    for set in sets {
        sink.write_line(&set.kind());
        let Some(entries) = set.entries() else {
            continue;
        };
        for entry in entries {
            sink.write_line(&entry.describe());
            scan_entry(entry.as_ref(), cache, sink, &mut discovered);
        }
    }
    debug!(path_count = discovered.len(), "Change sets scanned");
    discovered
}
