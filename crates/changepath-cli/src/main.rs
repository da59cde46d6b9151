//! with-changesets - run a command once per file changed in a build
//!
//! Loads a recorded build history, runs the `withChangeSets` step against
//! one build and spawns the given command for every changed file with
//! `changePath` set. With no changed files the command runs once without it.
//!
//! ```text
//! with-changesets --history builds.json -- sh -c 'rustfmt --check "$changePath"'
//! ```

mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use changepath_core::{
    init_tracing, BodyInvoker, BuildHistory, BuildRecord, ChangeSetsStep, OutputSink,
    StepContext, StepOutcome, StepStart,
};
use clap::Parser;
use tracing::{info, Level};

use crate::process::{InvokerConfig, ProcessInvoker};

#[derive(Parser, Debug)]
#[command(name = "with-changesets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a command once per file changed in a recorded build", long_about = None)]
struct Cli {
    /// Build history file (JSON)
    #[arg(long, env = "CHANGEPATH_HISTORY")]
    history: PathBuf,

    /// Build number to run against (default: latest)
    #[arg(long, env = "CHANGEPATH_BUILD")]
    build: Option<u64>,

    /// Maximum bodies running at once
    #[arg(long, env = "CHANGEPATH_MAX_PARALLEL", default_value_t = 1)]
    max_parallel: usize,

    /// Per-body timeout in seconds (0 = none)
    #[arg(long, env = "CHANGEPATH_TIMEOUT_SECS", default_value_t = 0)]
    timeout_secs: u64,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "CHANGEPATH_LOG_JSON")]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Body command and its arguments
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

/// Build log on stdout.
struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

struct CliContext {
    build: Arc<dyn BuildRecord>,
    sink: Arc<dyn OutputSink>,
    invoker: Arc<dyn BodyInvoker>,
}

impl StepContext for CliContext {
    fn build(&self) -> Option<Arc<dyn BuildRecord>> {
        Some(Arc::clone(&self.build))
    }

    fn output(&self) -> Arc<dyn OutputSink> {
        Arc::clone(&self.sink)
    }

    fn body_invoker(&self) -> Arc<dyn BodyInvoker> {
        Arc::clone(&self.invoker)
    }
}

/// Run the step for `build` (or the latest build) and wait for every body.
async fn run_step(
    history_path: &Path,
    build: Option<u64>,
    command: Vec<String>,
    config: InvokerConfig,
    sink: Arc<dyn OutputSink>,
) -> Result<StepOutcome> {
    let history = BuildHistory::load(history_path).with_context(|| {
        format!(
            "Failed to load build history from {}",
            history_path.display()
        )
    })?;
    let build = match build {
        Some(number) => history.build(number)?,
        None => history.latest()?,
    };
    match build.started_at() {
        Some(started_at) => info!(build = build.number(), %started_at, "Selected build"),
        None => info!(build = build.number(), "Selected build"),
    }

    let invoker = ProcessInvoker::new(command, config)?;
    let context = Arc::new(CliContext {
        build,
        sink,
        invoker: Arc::new(invoker),
    });

    let mut execution = ChangeSetsStep::new().start(context);
    match execution.start() {
        StepStart::NotStarted => anyhow::bail!("withChangeSets could not start"),
        StepStart::Pending(completion) => Ok(completion.await),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = InvokerConfig {
        max_parallel: cli.max_parallel,
        timeout_secs: cli.timeout_secs,
    };
    let outcome = run_step(
        &cli.history,
        cli.build,
        cli.command,
        config,
        Arc::new(ConsoleSink),
    )
    .await?;

    match outcome {
        Ok(report) => {
            println!(
                "withChangeSets completed: {} file(s), {} body run(s) succeeded",
                report.paths.len(),
                report.succeeded
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("withChangeSets failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changepath_core::fakes::MemorySink;
    use changepath_core::StepError;
    use serde_json::json;

    fn write_history(dir: &Path, builds: serde_json::Value) -> PathBuf {
        let path = dir.join("history.json");
        std::fs::write(&path, json!({ "builds": builds }).to_string()).expect("write history");
        path
    }

    fn git_change_set(paths: &[&str]) -> serde_json::Value {
        json!({
            "kind": "git",
            "entries": [{
                "scm": "git",
                "commit_id": "abc123",
                "affected_files": paths.iter().map(|p| json!({ "path": p })).collect::<Vec<_>>(),
            }]
        })
    }

    fn sh(script: String) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script]
    }

    #[test]
    fn test_cli_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "with-changesets",
            "--history",
            "builds.json",
            "--build",
            "4",
            "--max-parallel",
            "3",
            "--",
            "echo",
            "hi",
        ])
        .expect("parse");
        assert_eq!(cli.build, Some(4));
        assert_eq!(cli.max_parallel, 3);
        assert_eq!(cli.command, vec!["echo", "hi"]);
        assert!(!cli.json);
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["with-changesets", "--history", "b.json"]).is_err());
    }

    #[tokio::test]
    async fn test_run_step_invokes_body_per_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("seen.txt");
        let history = write_history(
            dir.path(),
            json!([
                { "number": 1, "result": "FAILURE", "change_sets": [git_change_set(&["x.txt"])] },
                { "number": 2, "building": true, "change_sets": [git_change_set(&["a.txt", "x.txt"])] }
            ]),
        );

        let sink = Arc::new(MemorySink::new());
        let outcome = run_step(
            &history,
            None,
            sh(format!(r#"echo "$changePath" >> "{}""#, out.display())),
            InvokerConfig::default(),
            sink.clone(),
        )
        .await
        .expect("run");

        let report = outcome.expect("step succeeded");
        assert_eq!(report.paths, vec!["x.txt", "a.txt"]);
        let seen = std::fs::read_to_string(&out).expect("read");
        assert_eq!(seen.lines().collect::<Vec<_>>(), vec!["x.txt", "a.txt"]);
        assert!(sink.contains("including changes from previous build #1"));
    }

    #[tokio::test]
    async fn test_run_step_default_body_without_change_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("seen.txt");
        let history = write_history(dir.path(), json!([{ "number": 1, "building": true }]));

        let sink = Arc::new(MemorySink::new());
        let outcome = run_step(
            &history,
            Some(1),
            sh(format!(
                r#"echo "unset=${{changePath-yes}}" >> "{}""#,
                out.display()
            )),
            InvokerConfig::default(),
            sink.clone(),
        )
        .await
        .expect("run");

        assert!(outcome.is_ok());
        let seen = std::fs::read_to_string(&out).expect("read");
        assert_eq!(seen.trim(), "unset=yes");
        assert!(sink.contains("no change files found"));
    }

    #[tokio::test]
    async fn test_run_step_body_failure_fails_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = write_history(
            dir.path(),
            json!([{ "number": 1, "change_sets": [git_change_set(&["a", "b"])] }]),
        );

        let outcome = run_step(
            &history,
            None,
            sh(r#"test "$changePath" != b"#.to_string()),
            InvokerConfig {
                max_parallel: 2,
                timeout_secs: 30,
            },
            Arc::new(MemorySink::new()),
        )
        .await
        .expect("run");

        match outcome {
            Err(StepError::BodyFailed { failed, .. }) => assert_eq!(failed, 1),
            other => panic!("expected body failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_step_unknown_build() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = write_history(dir.path(), json!([{ "number": 1 }]));

        let err = run_step(
            &history,
            Some(9),
            sh("true".to_string()),
            InvokerConfig::default(),
            Arc::new(MemorySink::new()),
        )
        .await
        .expect_err("unknown build");
        assert!(err.to_string().contains("#9"));
    }
}
