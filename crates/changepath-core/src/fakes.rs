//! In-memory host fakes (testing only)
//!
//! Provides `MemorySink`, `RecordingInvoker`, `FixedEnvironment` and
//! `FakeContext` that satisfy the host traits without an orchestrator.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::completion::BodyCallback;
use crate::env::{EnvVars, EnvironmentExpander};
use crate::error::{BodyFailure, ExpandError, InvokeError};
use crate::fanout::CHANGE_PATH_VAR;
use crate::host::{BodyInvocation, BodyInvoker, BuildRecord, OutputSink, StepContext};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Output sink that keeps every line.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|line| line.contains(needle))
    }
}

impl OutputSink for MemorySink {
    fn write_line(&self, line: &str) {
        lock(&self.lines).push(line.to_string());
    }
}

// ---------------------------------------------------------------------------
// RecordingInvoker
// ---------------------------------------------------------------------------

/// What the fake host saw for one accepted body request.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub id: Uuid,
    /// The body's environment expanded over an empty base; `None` when the
    /// request carried no expander.
    pub environment: Option<EnvVars>,
}

impl RecordedInvocation {
    pub fn change_path(&self) -> Option<&str> {
        self.environment
            .as_ref()
            .and_then(|env| env.get(CHANGE_PATH_VAR))
    }
}

#[derive(Default)]
struct InvokerState {
    attempts: usize,
    records: Vec<RecordedInvocation>,
    pending: Vec<Option<BodyCallback>>,
}

/// Body invoker that records requests and completes them on demand.
#[derive(Default)]
pub struct RecordingInvoker {
    state: Mutex<InvokerState>,
    fail_attempts: HashSet<usize>,
    immediate: Option<Result<(), BodyFailure>>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every body inside `start` with `result`.
    pub fn completing_immediately(result: Result<(), BodyFailure>) -> Self {
        Self {
            immediate: Some(result),
            ..Self::default()
        }
    }

    /// Reject the given zero-based request attempts with an I/O error.
    pub fn failing_attempts(attempts: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_attempts: attempts.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        lock(&self.state).records.clone()
    }

    /// `changePath` of each accepted request, in request order.
    pub fn change_paths(&self) -> Vec<Option<String>> {
        lock(&self.state)
            .records
            .iter()
            .map(|r| r.change_path().map(str::to_string))
            .collect()
    }

    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Report the outcome of accepted request `index`. Returns `false` if it
    /// was unknown or already completed.
    pub fn complete(&self, index: usize, result: Result<(), BodyFailure>) -> bool {
        let callback = lock(&self.state)
            .pending
            .get_mut(index)
            .and_then(Option::take);
        match callback {
            Some(callback) => {
                callback.complete(result);
                true
            }
            None => false,
        }
    }

    pub fn complete_all(&self, result: Result<(), BodyFailure>) {
        let callbacks: Vec<_> = lock(&self.state)
            .pending
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for callback in callbacks {
            callback.complete(result.clone());
        }
    }
}

impl BodyInvoker for RecordingInvoker {
    fn start(&self, invocation: BodyInvocation) -> Result<(), InvokeError> {
        let attempt = {
            let mut state = lock(&self.state);
            state.attempts += 1;
            state.attempts - 1
        };
        if self.fail_attempts.contains(&attempt) {
            return Err(InvokeError::Io(std::io::Error::other(format!(
                "simulated failure for request {attempt}"
            ))));
        }

        let BodyInvocation {
            id,
            environment,
            callback,
        } = invocation;

        let expanded = match environment {
            Some(expander) => {
                let mut env = EnvVars::new();
                if let Err(e) = expander.expand(&mut env) {
                    callback.on_failure(BodyFailure::new(e.to_string()));
                    return Ok(());
                }
                Some(env)
            }
            None => None,
        };

        let callback = match &self.immediate {
            Some(result) => {
                callback.complete(result.clone());
                None
            }
            None => Some(callback),
        };

        let mut state = lock(&self.state);
        state.records.push(RecordedInvocation {
            id,
            environment: expanded,
        });
        state.pending.push(callback);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FixedEnvironment / FakeContext
// ---------------------------------------------------------------------------

/// Ambient expander applying a fixed set of bindings.
#[derive(Debug, Clone, Default)]
pub struct FixedEnvironment {
    pub vars: EnvVars,
}

impl EnvironmentExpander for FixedEnvironment {
    fn expand(&self, env: &mut EnvVars) -> Result<(), ExpandError> {
        for (key, value) in self.vars.iter() {
            env.override_var(key, value);
        }
        Ok(())
    }
}

/// Step context over fakes.
pub struct FakeContext {
    build: Option<Arc<dyn BuildRecord>>,
    sink: Arc<MemorySink>,
    invoker: Arc<RecordingInvoker>,
    environment: Option<Arc<dyn EnvironmentExpander>>,
}

impl FakeContext {
    pub fn new(build: Option<Arc<dyn BuildRecord>>) -> Self {
        Self {
            build,
            sink: Arc::new(MemorySink::new()),
            invoker: Arc::new(RecordingInvoker::new()),
            environment: None,
        }
    }

    pub fn with_invoker(mut self, invoker: RecordingInvoker) -> Self {
        self.invoker = Arc::new(invoker);
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentExpander>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn sink(&self) -> Arc<MemorySink> {
        Arc::clone(&self.sink)
    }

    pub fn invoker(&self) -> Arc<RecordingInvoker> {
        Arc::clone(&self.invoker)
    }
}

impl StepContext for FakeContext {
    fn build(&self) -> Option<Arc<dyn BuildRecord>> {
        self.build.clone()
    }

    fn output(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }

    fn environment(&self) -> Option<Arc<dyn EnvironmentExpander>> {
        self.environment.clone()
    }

    fn body_invoker(&self) -> Arc<dyn BodyInvoker> {
        self.invoker.clone()
    }
}
