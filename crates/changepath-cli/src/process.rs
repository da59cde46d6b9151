//! Body invoker that runs a shell command per invocation.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use changepath_core::{
    BodyFailure, BodyInvocation, BodyInvoker, EnvVars, EnvironmentExpander, InvokeError,
    CHANGE_PATH_VAR,
};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::debug;

/// Host-side scheduling of body processes.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Bodies allowed to run at once.
    pub max_parallel: usize,
    /// Per-body limit in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        InvokerConfig {
            max_parallel: 1,
            timeout_secs: 0,
        }
    }
}

/// Spawns `command` on the current tokio runtime for every body request.
pub struct ProcessInvoker {
    command: Arc<Vec<String>>,
    config: InvokerConfig,
    runtime: Handle,
    permits: Arc<Semaphore>,
}

impl ProcessInvoker {
    pub fn new(command: Vec<String>, config: InvokerConfig) -> Result<Self> {
        if command.is_empty() {
            anyhow::bail!("Body command is empty");
        }
        let runtime = Handle::try_current().map_err(|_| InvokeError::NoRuntime)?;
        let permits = Arc::new(Semaphore::new(config.max_parallel.max(1)));
        Ok(Self {
            command: Arc::new(command),
            config,
            runtime,
            permits,
        })
    }
}

/// Process environment with the invocation's expander applied.
///
/// `changePath` is never inherited from the parent process.
fn body_environment(
    expander: Option<&dyn EnvironmentExpander>,
) -> Result<EnvVars, changepath_core::ExpandError> {
    let mut env: EnvVars = std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect();
    env.override_var(CHANGE_PATH_VAR, "");
    if let Some(expander) = expander {
        expander.expand(&mut env)?;
    }
    Ok(env)
}

async fn run_body(
    command: &[String],
    env: &EnvVars,
    timeout_secs: u64,
) -> Result<(), BodyFailure> {
    let exe = &command[0];
    let mut cmd = Command::new(exe);
    cmd.args(&command[1..])
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let status = if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.status()).await {
            Ok(status) => status,
            Err(_) => {
                return Err(BodyFailure::new(format!(
                    "{exe} timed out after {timeout_secs} seconds"
                )))
            }
        }
    } else {
        cmd.status().await
    };
    let status = status.map_err(|e| BodyFailure::new(format!("failed to spawn {exe}: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(BodyFailure::new(format!(
            "{exe} exited with code {}",
            status.code().unwrap_or(-1)
        )))
    }
}

impl BodyInvoker for ProcessInvoker {
    fn start(&self, invocation: BodyInvocation) -> Result<(), InvokeError> {
        let BodyInvocation {
            id,
            environment,
            callback,
        } = invocation;

        let env = match body_environment(environment.as_deref()) {
            Ok(env) => env,
            Err(e) => {
                callback.on_failure(BodyFailure::new(e.to_string()));
                return Ok(());
            }
        };

        let command = Arc::clone(&self.command);
        let permits = Arc::clone(&self.permits);
        let timeout_secs = self.config.timeout_secs;

        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                callback.on_failure(BodyFailure::new("invoker shut down"));
                return;
            };
            debug!(invocation_id = %id, "Running body");
            callback.complete(run_body(&command, &env, timeout_secs).await);
        });
        Ok(())
    }
}
