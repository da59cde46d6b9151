//! changepath - run a pipeline block once per changed file
//!
//! Implements the `withChangeSets` step:
//! - Collects change sets from the current build, and from the previous
//!   build when that one finished without success
//! - Dedups affected files into an ordered path list
//! - Requests one body invocation per path with `changePath` overridden,
//!   or a single plain invocation when nothing changed
//! - Aggregates body completions into the step's own outcome
//!
//! The orchestration host is reached only through the traits in [`host`].
//! [`snapshot`] adapts a JSON build history to them and [`fakes`] provides
//! in-memory doubles for tests.

pub mod cache;
pub mod collect;
pub mod completion;
pub mod env;
pub mod error;
pub mod fakes;
mod fanout;
pub mod host;
pub mod snapshot;
pub mod step;
pub mod telemetry;

pub use cache::FileCache;
pub use collect::{collect_change_sets, scan_change_sets, scan_entry, RECOGNIZED_SCM};
pub use completion::{BodyCallback, StepCompletion, StepOutcome, StepReport, StepState};
pub use env::{merge, EnvVars, EnvironmentExpander, EnvironmentOverride};
pub use error::{BodyFailure, ExpandError, InvokeError, SnapshotError, StepError};
pub use fanout::CHANGE_PATH_VAR;
pub use host::{
    AffectedFile, AffectedFileProvider, BodyInvocation, BodyInvoker, BuildRecord, BuildResult,
    ChangeSet, EditType, Entry, OutputSink, ScmBuild, ScmKind, StepContext,
};
pub use snapshot::{BuildHistory, BuildSpec, SnapshotBuild};
pub use step::{ChangeSetsStep, Execution, RequiredContext, StepStart};
pub use telemetry::init_tracing;

/// changepath version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
