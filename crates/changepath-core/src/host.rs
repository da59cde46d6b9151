//! Host collaborator traits.
//!
//! The orchestration host owns builds, change sets, the output sink and the
//! mechanism that actually runs a body. The step only sees them through
//! these traits:
//! - `BuildRecord` / `ScmBuild`: one pipeline execution and its change sets
//! - `ChangeSet` / `Entry` / `AffectedFileProvider`: source-control data
//! - `BodyInvoker`: schedules one run of the enclosed block
//! - `OutputSink`: the build log
//! - `StepContext`: bundles the above for one step invocation
//!
//! Capabilities the host may or may not offer (change-set access on a build,
//! affected files on an entry) are `Option`-returning accessors with a `None`
//! default, so unrecognized variants fall through without an error.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::completion::BodyCallback;
use crate::env::EnvironmentExpander;
use crate::error::InvokeError;

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

/// Final result of a finished build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Unstable => "UNSTABLE",
            BuildResult::Failure => "FAILURE",
            BuildResult::NotBuilt => "NOT_BUILT",
            BuildResult::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// One execution of the pipeline.
pub trait BuildRecord: Send + Sync {
    /// Display identifier (e.g. `#42`).
    fn id(&self) -> String;

    /// Whether the build is still executing.
    fn is_running(&self) -> bool;

    /// `None` while running or when the host never recorded a result.
    fn result(&self) -> Option<BuildResult>;

    /// The build immediately before this one.
    fn previous(&self) -> Option<Arc<dyn BuildRecord>>;

    /// Change-set capability; `None` for builds without SCM data.
    fn as_scm(&self) -> Option<&dyn ScmBuild> {
        None
    }
}

/// Builds that record source-control change sets.
pub trait ScmBuild {
    /// Change sets in the order the host recorded them.
    fn change_sets(&self) -> Vec<Arc<dyn ChangeSet>>;
}

// ---------------------------------------------------------------------------
// Change sets
// ---------------------------------------------------------------------------

/// Source-control systems an entry can come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScmKind {
    Git,
    Subversion,
    Mercurial,
    Other,
}

/// How an entry touched a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    Add,
    Edit,
    Delete,
}

/// A file path touched by an entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AffectedFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_type: Option<EditType>,
}

impl AffectedFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            edit_type: None,
        }
    }
}

/// A batch of changes from one polling or trigger event.
pub trait ChangeSet: Send + Sync {
    /// Label of the producing SCM (e.g. `git`).
    fn kind(&self) -> String;

    /// Entries in natural order; `None` when the host has no item array.
    fn entries(&self) -> Option<Vec<Arc<dyn Entry>>>;
}

/// One commit or atomic change.
pub trait Entry: Send + Sync {
    /// Human-readable line for the build log.
    fn describe(&self) -> String;

    /// Affected-file capability for SCM flavors that expose one.
    fn affected_file_provider(&self) -> Option<&dyn AffectedFileProvider> {
        None
    }
}

/// Per-SCM access to the files an entry touched.
pub trait AffectedFileProvider {
    fn scm_kind(&self) -> ScmKind;

    /// `None` when the SCM did not record file-level data.
    fn affected_files(&self) -> Option<Vec<AffectedFile>>;
}

// ---------------------------------------------------------------------------
// Output and body invocation
// ---------------------------------------------------------------------------

/// The build log.
pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// One request to run the enclosed block.
pub struct BodyInvocation {
    /// Correlation id for logs.
    pub id: Uuid,
    /// Expander for the body's environment; `None` inherits the ambient one.
    pub environment: Option<Arc<dyn EnvironmentExpander>>,
    /// Must be completed (or dropped) once the body finishes.
    pub callback: BodyCallback,
}

impl fmt::Debug for BodyInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyInvocation")
            .field("id", &self.id)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Schedules body runs on the host.
///
/// `start` must return without waiting for the body; the host reports the
/// outcome later through the invocation's callback, from any thread.
pub trait BodyInvoker: Send + Sync {
    fn start(&self, invocation: BodyInvocation) -> Result<(), InvokeError>;
}

/// Context objects the host supplies to one step invocation.
pub trait StepContext: Send + Sync {
    fn build(&self) -> Option<Arc<dyn BuildRecord>>;

    fn output(&self) -> Arc<dyn OutputSink>;

    /// Ambient expander from enclosing steps, if any.
    fn environment(&self) -> Option<Arc<dyn EnvironmentExpander>> {
        None
    }

    fn body_invoker(&self) -> Arc<dyn BodyInvoker>;
}
