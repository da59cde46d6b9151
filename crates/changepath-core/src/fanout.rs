//! One body request per discovered path.

use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use crate::completion::CompletionTracker;
use crate::env::{merge, EnvironmentExpander, EnvironmentOverride};
use crate::host::{BodyInvocation, BodyInvoker, OutputSink};

/// Variable bound to the affected file's path inside each body.
pub const CHANGE_PATH_VAR: &str = "changePath";

pub(crate) struct FanOut<'a> {
    pub(crate) invoker: &'a dyn BodyInvoker,
    pub(crate) ambient: Option<Arc<dyn EnvironmentExpander>>,
    pub(crate) sink: &'a dyn OutputSink,
    pub(crate) tracker: &'a Arc<CompletionTracker>,
}

impl FanOut<'_> {
    /// Request a body with `changePath` bound to `path`.
    pub(crate) fn dispatch_path(&self, path: &str) {
        let overrides = EnvironmentOverride::single(CHANGE_PATH_VAR, path);
        self.sink
            .write_line(&format!("invoking body with {}", overrides.masked()));
        let environment = merge(self.ambient.clone(), Arc::new(overrides));
        self.issue(Some(environment));
    }

    /// Request the single body run used when no files were found.
    pub(crate) fn dispatch_default(&self) {
        self.sink.write_line("no change files found");
        self.issue(None);
    }

    /// Issuance failures are logged and swallowed so the remaining paths
    /// still get their bodies.
    fn issue(&self, environment: Option<Arc<dyn EnvironmentExpander>>) {
        let id = Uuid::new_v4();
        let invocation = BodyInvocation {
            id,
            environment,
            callback: self.tracker.register(id),
        };
        debug!(invocation_id = %id, environment = ?invocation.environment, "Issuing body");

        if let Err(e) = self.invoker.start(invocation) {
            self.tracker.note_not_issued();
            self.sink
                .write_line(&format!("failed to start body {id}: {e:?}"));
            error!(invocation_id = %id, error = %e, "Failed to start body");
        }
    }
}
