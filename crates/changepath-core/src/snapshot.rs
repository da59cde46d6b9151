//! JSON build-history host adapter.
//!
//! Loads a recorded sequence of builds and exposes them through the host
//! traits, so the step can run outside a live orchestrator:
//!
//! ```json
//! { "builds": [
//!     { "number": 41, "result": "FAILURE",
//!       "change_sets": [{ "kind": "git", "entries": [
//!           { "scm": "git", "commit_id": "9f2c", "author": "dev",
//!             "affected_files": [{ "path": "src/lib.rs", "edit_type": "edit" }] }
//!       ]}]},
//!     { "number": 42, "building": true }
//! ]}
//! ```
//!
//! Builds are linked to their predecessor by ascending `number`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SnapshotError, SnapshotResult};
use crate::host::{
    AffectedFile, AffectedFileProvider, BuildRecord, BuildResult, ChangeSet, Entry, ScmBuild,
    ScmKind,
};

fn default_true() -> bool {
    true
}

/// Serialized form of one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    pub number: u64,
    #[serde(default)]
    pub result: Option<BuildResult>,
    #[serde(default)]
    pub building: bool,
    /// Whether the build exposes change sets at all.
    #[serde(default = "default_true")]
    pub scm: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub change_sets: Vec<ChangeSetSpec>,
}

/// Serialized form of one change set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSetSpec {
    pub kind: String,
    /// `None` models a host with no item array.
    #[serde(default)]
    pub entries: Option<Vec<EntrySpec>>,
}

/// Serialized form of one entry. Without `scm` the entry has no
/// affected-file capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySpec {
    #[serde(default)]
    pub scm: Option<ScmKind>,
    #[serde(default)]
    pub commit_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub affected_files: Option<Vec<AffectedFile>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    builds: Vec<BuildSpec>,
}

// ---------------------------------------------------------------------------
// Host trait implementations
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SnapshotEntry {
    spec: EntrySpec,
}

impl Entry for SnapshotEntry {
    fn describe(&self) -> String {
        let commit = self.spec.commit_id.as_deref().unwrap_or("<unknown>");
        match (&self.spec.author, &self.spec.message) {
            (Some(author), Some(message)) => format!("{commit} {author}: {message}"),
            (Some(author), None) => format!("{commit} {author}"),
            (None, Some(message)) => format!("{commit}: {message}"),
            (None, None) => commit.to_string(),
        }
    }

    fn affected_file_provider(&self) -> Option<&dyn AffectedFileProvider> {
        self.spec.scm.map(|_| self as &dyn AffectedFileProvider)
    }
}

impl AffectedFileProvider for SnapshotEntry {
    fn scm_kind(&self) -> ScmKind {
        self.spec.scm.unwrap_or(ScmKind::Other)
    }

    fn affected_files(&self) -> Option<Vec<AffectedFile>> {
        self.spec.affected_files.clone()
    }
}

struct SnapshotChangeSet {
    kind: String,
    entries: Option<Vec<Arc<dyn Entry>>>,
}

impl ChangeSet for SnapshotChangeSet {
    fn kind(&self) -> String {
        self.kind.clone()
    }

    fn entries(&self) -> Option<Vec<Arc<dyn Entry>>> {
        self.entries.clone()
    }
}

/// A build from a loaded history.
pub struct SnapshotBuild {
    number: u64,
    result: Option<BuildResult>,
    building: bool,
    scm: bool,
    started_at: Option<DateTime<Utc>>,
    change_sets: Vec<Arc<dyn ChangeSet>>,
    previous: Option<Arc<SnapshotBuild>>,
}

impl SnapshotBuild {
    fn new(spec: BuildSpec, previous: Option<Arc<SnapshotBuild>>) -> Self {
        let change_sets = spec
            .change_sets
            .into_iter()
            .map(|set| {
                let entries = set.entries.map(|entries| {
                    entries
                        .into_iter()
                        .map(|spec| Arc::new(SnapshotEntry { spec }) as Arc<dyn Entry>)
                        .collect()
                });
                Arc::new(SnapshotChangeSet {
                    kind: set.kind,
                    entries,
                }) as Arc<dyn ChangeSet>
            })
            .collect();

        Self {
            number: spec.number,
            result: spec.result,
            building: spec.building,
            scm: spec.scm,
            started_at: spec.started_at,
            change_sets,
            previous,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

impl BuildRecord for SnapshotBuild {
    fn id(&self) -> String {
        format!("#{}", self.number)
    }

    fn is_running(&self) -> bool {
        self.building
    }

    fn result(&self) -> Option<BuildResult> {
        self.result
    }

    fn previous(&self) -> Option<Arc<dyn BuildRecord>> {
        self.previous
            .clone()
            .map(|previous| previous as Arc<dyn BuildRecord>)
    }

    fn as_scm(&self) -> Option<&dyn ScmBuild> {
        self.scm.then_some(self as &dyn ScmBuild)
    }
}

impl ScmBuild for SnapshotBuild {
    fn change_sets(&self) -> Vec<Arc<dyn ChangeSet>> {
        self.change_sets.clone()
    }
}

// ---------------------------------------------------------------------------
// BuildHistory
// ---------------------------------------------------------------------------

/// Linked builds ordered by number.
pub struct BuildHistory {
    builds: Vec<Arc<SnapshotBuild>>,
}

impl BuildHistory {
    pub fn from_specs(mut specs: Vec<BuildSpec>) -> Self {
        specs.sort_by_key(|spec| spec.number);
        let mut builds: Vec<Arc<SnapshotBuild>> = Vec::with_capacity(specs.len());
        for spec in specs {
            let previous = builds.last().cloned();
            builds.push(Arc::new(SnapshotBuild::new(spec, previous)));
        }
        Self { builds }
    }

    pub fn from_value(value: serde_json::Value) -> SnapshotResult<Self> {
        let file: HistoryFile = serde_json::from_value(value)?;
        Ok(Self::from_specs(file.builds))
    }

    pub fn from_json_str(json: &str) -> SnapshotResult<Self> {
        let file: HistoryFile = serde_json::from_str(json)?;
        Ok(Self::from_specs(file.builds))
    }

    /// Read a history file from disk.
    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let history = Self::from_json_str(&raw)?;
        debug!(path = %path.display(), builds = history.len(), "Loaded build history");
        Ok(history)
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    pub fn build(&self, number: u64) -> SnapshotResult<Arc<SnapshotBuild>> {
        self.builds
            .iter()
            .find(|b| b.number == number)
            .cloned()
            .ok_or(SnapshotError::UnknownBuild(number))
    }

    /// Highest-numbered build.
    pub fn latest(&self) -> SnapshotResult<Arc<SnapshotBuild>> {
        self.builds.last().cloned().ok_or(SnapshotError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builds_linked_by_number() {
        let history = BuildHistory::from_value(json!({
            "builds": [
                { "number": 3, "building": true },
                { "number": 1, "result": "SUCCESS" },
                { "number": 2, "result": "FAILURE" }
            ]
        }))
        .expect("parse");

        let latest = history.latest().expect("latest");
        assert_eq!(latest.number(), 3);
        let previous = latest.previous().expect("previous");
        assert_eq!(previous.id(), "#2");
        assert_eq!(previous.result(), Some(BuildResult::Failure));
        let first = previous.previous().expect("first");
        assert!(first.previous().is_none());
    }

    #[test]
    fn test_unknown_build() {
        let history = BuildHistory::from_value(json!({ "builds": [] })).expect("parse");
        assert!(matches!(history.build(9), Err(SnapshotError::UnknownBuild(9))));
        assert!(matches!(history.latest(), Err(SnapshotError::Empty)));
    }

    #[test]
    fn test_entry_capability_follows_scm_field() {
        let history = BuildHistory::from_value(json!({
            "builds": [{
                "number": 1,
                "change_sets": [{ "kind": "git", "entries": [
                    { "commit_id": "a1", "author": "dev", "message": "fix" },
                    { "scm": "git", "commit_id": "b2", "affected_files": [{ "path": "x", "edit_type": "add" }] }
                ]}]
            }]
        }))
        .expect("parse");

        let build = history.build(1).expect("build");
        let sets = build.as_scm().expect("scm").change_sets();
        let entries = sets[0].entries().expect("entries");
        assert_eq!(entries[0].describe(), "a1 dev: fix");
        assert!(entries[0].affected_file_provider().is_none());

        let provider = entries[1].affected_file_provider().expect("provider");
        assert_eq!(provider.scm_kind(), ScmKind::Git);
        let files = provider.affected_files().expect("files");
        assert_eq!(files[0].edit_type, Some(crate::host::EditType::Add));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"{ "builds": [{ "number": 5, "started_at": "2024-01-02T03:04:05Z", "scm": false }] }"#,
        )
        .expect("write");

        let history = BuildHistory::load(&path).expect("load");
        let build = history.build(5).expect("build");
        assert!(build.as_scm().is_none());
        assert!(build.started_at().is_some());
    }

    #[test]
    fn test_malformed_history() {
        assert!(matches!(
            BuildHistory::from_json_str("{ not json"),
            Err(SnapshotError::Parse(_))
        ));
    }
}
