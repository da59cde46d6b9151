//! The `withChangeSets` step.
//!
//! ```text
//! withChangeSets {
//!     sh 'lint "$changePath"'
//! }
//! ```
//!
//! On start the execution:
//! 1. collects change sets (previous build first when it did not succeed),
//! 2. dedups their affected files into an ordered path list,
//! 3. requests one body per path with `changePath` overridden, or a single
//!    plain body when no paths were found,
//! 4. returns immediately; the step completes through [`StepCompletion`]
//!    once every requested body has reported back.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::FileCache;
use crate::collect::{collect_change_sets, scan_change_sets};
use crate::completion::{CompletionTracker, StepCompletion, StepState};
use crate::fanout::FanOut;
use crate::host::StepContext;

/// Context objects the step needs from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredContext {
    Build,
    Output,
}

/// Step descriptor. Takes no arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetsStep;

impl ChangeSetsStep {
    pub const FUNCTION_NAME: &'static str = "withChangeSets";

    pub fn new() -> Self {
        Self
    }

    pub fn function_name(&self) -> &'static str {
        Self::FUNCTION_NAME
    }

    pub fn display_name(&self) -> &'static str {
        Self::FUNCTION_NAME
    }

    /// The step wraps a block of pipeline steps.
    pub fn takes_implicit_block_argument(&self) -> bool {
        true
    }

    pub fn required_context(&self) -> &'static [RequiredContext] {
        &[RequiredContext::Output, RequiredContext::Build]
    }

    pub fn start(&self, context: Arc<dyn StepContext>) -> Execution {
        Execution::new(context)
    }
}

/// Result of [`Execution::start`].
#[derive(Debug)]
pub enum StepStart {
    /// No build record in context; the host decides how to proceed.
    NotStarted,
    /// Bodies were requested; the step completes asynchronously.
    Pending(StepCompletion),
}

impl StepStart {
    pub fn is_pending(&self) -> bool {
        matches!(self, StepStart::Pending(_))
    }
}

/// One running invocation of the step.
pub struct Execution {
    context: Arc<dyn StepContext>,
    tracker: Option<Arc<CompletionTracker>>,
}

impl Execution {
    fn new(context: Arc<dyn StepContext>) -> Self {
        Self {
            context,
            tracker: None,
        }
    }

    /// Run the synchronous start phase.
    ///
    /// Never waits for a body and never reports completion directly.
    pub fn start(&mut self) -> StepStart {
        let Some(build) = self.context.build() else {
            info!("withChangeSets: no build record in context");
            return StepStart::NotStarted;
        };
        let sink = self.context.output();

        let (tracker, completion) = CompletionTracker::new();
        self.tracker = Some(Arc::clone(&tracker));

        let paths = {
            let mut cache = FileCache::new();
            let sets = collect_change_sets(build.as_ref(), sink.as_ref());
            let paths = scan_change_sets(&sets, &mut cache, sink.as_ref());
            info!(
                build = %build.id(),
                change_sets = sets.len(),
                path_count = cache.len(),
                "Collected changed files"
            );
            paths
        };

        tracker.transition(StepState::Dispatching);
        let invoker = self.context.body_invoker();
        let fan_out = FanOut {
            invoker: invoker.as_ref(),
            ambient: self.context.environment(),
            sink: sink.as_ref(),
            tracker: &tracker,
        };
        if paths.is_empty() {
            fan_out.dispatch_default();
        } else {
            for path in &paths {
                fan_out.dispatch_path(path);
            }
        }

        tracker.seal(paths);
        StepStart::Pending(completion)
    }

    /// Current lifecycle state; `None` before `start` ran or when it did not
    /// start.
    pub fn state(&self) -> Option<StepState> {
        self.tracker.as_ref().map(|t| t.state())
    }

    /// After a host restart nothing is rebuilt.
    pub fn on_resume(&self) {
        debug!("withChangeSets resumed; no state to restore");
    }
}
