// src/exec/task_runner.rs

//! Build-type task hand-off.
//!
//! A build task is handed to a [`TaskRunner`]. [`CommandTaskRunner`] takes the
//! repository's exclusivity tag and runs the configured `task_command`;
//! [`HandoffPrinter`] only prints the task for an external system to pick up.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::model::Registry;
use crate::dispatch::TaskSpec;
use crate::exclusive::{exclusivity_tag, ExclusiveLocks};
use crate::types::LockGranularity;

/// Result of handing one task to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(i32),
    /// The exclusivity tag was busy and the handler did nothing.
    Skipped,
}

pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'a>>;

/// Handler for build-type tasks.
pub trait TaskRunner: Send + Sync {
    fn run_task(&self, task: TaskSpec) -> TaskFuture<'_>;
}

/// Runs `task_command` through the shell for every build task.
///
/// The task arguments are passed as positional parameters and the task is
/// also described in `CI_DISPATCH_*` environment variables.
#[derive(Debug)]
pub struct CommandTaskRunner {
    command: String,
    registry: Arc<Registry>,
    locks: Arc<ExclusiveLocks>,
    granularity: LockGranularity,
    queue_if_busy: bool,
}

impl CommandTaskRunner {
    pub fn new(command: impl Into<String>, registry: Arc<Registry>, locks: Arc<ExclusiveLocks>) -> Self {
        let granularity = registry.config.lock_granularity;
        let queue_if_busy = registry.config.queue_if_busy;
        Self {
            command: command.into(),
            registry,
            locks,
            granularity,
            queue_if_busy,
        }
    }

    async fn run(&self, task: TaskSpec) -> TaskOutcome {
        let tag = exclusivity_tag(&task.repository, &task.branch, self.granularity);
        let Some(guard) = self.locks.acquire(&tag, self.queue_if_busy).await else {
            info!(
                tag = %tag,
                repository = %task.repository,
                branch = %task.branch,
                "build already running; skipping"
            );
            return TaskOutcome::Skipped;
        };

        let outcome = self.run_inner(&task, guard.tag()).await;
        drop(guard);
        match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    repository = %task.repository,
                    branch = %task.branch,
                    error = %err,
                    "task execution error"
                );
                TaskOutcome::Failed(-1)
            }
        }
    }

    async fn run_inner(&self, task: &TaskSpec, tag: &str) -> Result<TaskOutcome> {
        info!(
            tag = %tag,
            task_type = %task.task_type,
            repository = %task.repository,
            branch = %task.branch,
            cmd = %self.command,
            "starting build task"
        );

        let keep_history = self
            .registry
            .get(&task.repository)
            .map(|r| r.effective_keep_history())
            .unwrap_or(crate::config::model::DEFAULT_KEEP_HISTORY);
        let (dep_repo, dep_branch) = match &task.triggered_by {
            Some(p) => (p.repository.as_str(), p.branch.as_str()),
            None => ("", ""),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("{} \"$@\"", self.command))
            .arg("ci-dispatch")
            .args(task.args())
            .env("CI_DISPATCH_TYPE", &task.task_type)
            .env("CI_DISPATCH_REPO", &task.repository)
            .env("CI_DISPATCH_BRANCH", &task.branch)
            .env("CI_DISPATCH_DEPBUILD", task.is_dependent_build().to_string())
            .env("CI_DISPATCH_DEPREPO", dep_repo)
            .env("CI_DISPATCH_DEPBRANCH", dep_branch)
            .env("CI_DISPATCH_PIPELINE", task.pipeline.as_deref().unwrap_or(""))
            .env("CI_DISPATCH_KEEP_HISTORY", keep_history.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning build task for '{}'", task.repository))?;

        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            let repository = task.repository.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(repository = %repository, "stdout: {}", line);
                }
            }));
        }

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            let repository = task.repository.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(repository = %repository, "stderr: {}", line);
                }
            }));
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for build task of '{}'", task.repository))?;

        // Drain remaining output before reporting the exit.
        for reader in readers {
            if let Err(err) = reader.await {
                warn!(repository = %task.repository, error = %err, "output reader failed");
            }
        }

        let code = status.code().unwrap_or(-1);
        info!(
            repository = %task.repository,
            branch = %task.branch,
            exit_code = code,
            success = status.success(),
            "build task exited"
        );

        Ok(if status.success() {
            TaskOutcome::Success
        } else {
            TaskOutcome::Failed(code)
        })
    }
}

impl TaskRunner for CommandTaskRunner {
    fn run_task(&self, task: TaskSpec) -> TaskFuture<'_> {
        Box::pin(self.run(task))
    }
}

/// Prints each build task to stdout for an external build system.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandoffPrinter;

impl TaskRunner for HandoffPrinter {
    fn run_task(&self, task: TaskSpec) -> TaskFuture<'_> {
        Box::pin(async move {
            let line = format!("task {} {}", task.task_type, task.args().join(" "));
            match writeln!(std::io::stdout(), "{line}") {
                Ok(()) => TaskOutcome::Success,
                Err(err) => {
                    error!(error = %err, "writing task to stdout");
                    TaskOutcome::Failed(-1)
                }
            }
        })
    }
}
