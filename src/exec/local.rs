// src/exec/local.rs

//! In-process scheduler.
//!
//! Every job runs as a strictly sequential pipeline of steps. Dispatch jobs
//! are interpreted by [`BuildDispatcher`]: their sequential enqueues are
//! appended to the *current* pipeline, while spawned jobs are sent to the
//! spawn loop and start as independent tokio tasks. No handle to a spawned
//! job is kept; its result never flows back to the spawner.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::config::model::Registry;
use crate::dispatch::{BuildDispatcher, JobSpec, ScheduleOp, TaskSpec};
use crate::exec::backend::{SchedulerBackend, SubmitFuture};
use crate::exec::task_runner::{TaskOutcome, TaskRunner};

/// One step of a job pipeline.
#[derive(Debug, Clone)]
enum Step {
    Task(TaskSpec),
    Job(JobSpec),
}

struct Inner {
    registry: Arc<Registry>,
    runner: Arc<dyn TaskRunner>,
    spawn_tx: mpsc::UnboundedSender<Step>,
    status_tx: Option<mpsc::UnboundedSender<String>>,
    active: AtomicUsize,
    idle: Notify,
}

/// Reference scheduler running pipelines on the tokio runtime.
///
/// Cheap to clone; all clones share one spawn loop.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("active", &self.active_jobs())
            .finish_non_exhaustive()
    }
}

impl LocalScheduler {
    /// Create the scheduler and start its spawn loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(registry: Arc<Registry>, runner: Arc<dyn TaskRunner>) -> Self {
        Self::build(registry, runner, None)
    }

    /// Like [`LocalScheduler::new`], additionally forwarding every status
    /// report to `status_tx`.
    pub fn with_status_channel(
        registry: Arc<Registry>,
        runner: Arc<dyn TaskRunner>,
        status_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self::build(registry, runner, Some(status_tx))
    }

    fn build(
        registry: Arc<Registry>,
        runner: Arc<dyn TaskRunner>,
        status_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        let (spawn_tx, spawn_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            registry,
            runner,
            spawn_tx,
            status_tx,
            active: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        spawn_loop(Arc::downgrade(&inner), spawn_rx);
        Self { inner }
    }

    /// Start `job` as an independent pipeline.
    pub fn submit_job(&self, job: JobSpec) {
        self.inner.start(Step::Job(job));
    }

    /// Start `task` as a pipeline of its own.
    pub fn submit_task(&self, task: TaskSpec) {
        self.inner.start(Step::Task(task));
    }

    /// Number of pipelines started and not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until no pipeline is running. Only used at process shutdown.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_jobs() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl SchedulerBackend for LocalScheduler {
    fn submit(&mut self, op: ScheduleOp) -> SubmitFuture<'_> {
        Box::pin(async move {
            match op {
                // Top-level operations have no enclosing pipeline: each one
                // starts its own.
                ScheduleOp::EnqueueTask(task) => self.submit_task(task),
                ScheduleOp::EnqueueJob(job) | ScheduleOp::SpawnJob(job) => self.submit_job(job),
                ScheduleOp::Report(message) => self.inner.report(message),
            }
            Ok(())
        })
    }
}

impl Inner {
    fn start(&self, step: Step) {
        self.active.fetch_add(1, Ordering::SeqCst);
        if self.spawn_tx.send(step).is_err() {
            error!("spawn loop is gone; dropping job");
            self.finish_one();
        }
    }

    fn finish_one(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn report(&self, message: String) {
        info!(status = %message, "status report");
        if let Some(tx) = &self.status_tx {
            let _ = tx.send(message);
        }
    }

    /// Apply one dispatcher operation from inside a running pipeline.
    fn apply(&self, op: ScheduleOp, pipeline: &mut VecDeque<Step>) {
        match op {
            ScheduleOp::EnqueueTask(task) => pipeline.push_back(Step::Task(task)),
            ScheduleOp::EnqueueJob(job) => pipeline.push_back(Step::Job(job)),
            ScheduleOp::SpawnJob(job) => self.start(Step::Job(job)),
            ScheduleOp::Report(message) => self.report(message),
        }
    }
}

/// Receive spawn requests and start each as an independent tokio task.
///
/// Holds only a weak reference so the loop ends once every scheduler handle
/// and running pipeline is gone.
fn spawn_loop(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Step>) {
    tokio::spawn(async move {
        debug!("scheduler spawn loop started");
        while let Some(step) = rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            tokio::spawn(run_pipeline(inner, VecDeque::from([step])));
        }
        debug!("scheduler spawn loop finished");
    });
}

async fn run_pipeline(inner: Arc<Inner>, mut pipeline: VecDeque<Step>) {
    while let Some(step) = pipeline.pop_front() {
        match step {
            Step::Task(task) => {
                let repository = task.repository.clone();
                let branch = task.branch.clone();
                match inner.runner.run_task(task).await {
                    TaskOutcome::Success => {}
                    TaskOutcome::Skipped => {
                        debug!(
                            repository = %repository,
                            branch = %branch,
                            "task skipped; ending job"
                        );
                        break;
                    }
                    TaskOutcome::Failed(code) => {
                        warn!(
                            repository = %repository,
                            branch = %branch,
                            exit_code = code,
                            "task failed; ending job"
                        );
                        inner.report(format!("{repository} {branch} build failed"));
                        break;
                    }
                }
            }
            Step::Job(job) => {
                if job.job_type != inner.registry.config.dispatch_job {
                    warn!(job_type = %job.job_type, "no handler for job type");
                    inner.report(format!("no handler for job type '{}'", job.job_type));
                    break;
                }
                match BuildDispatcher::new(&inner.registry).step(&job.command) {
                    Ok(step) => {
                        for op in step.ops {
                            inner.apply(op, &mut pipeline);
                        }
                    }
                    Err(err) => {
                        error!(command = %job.command, error = %err, "dispatch failed");
                        inner.report(format!("dispatch of '{}' failed: {err}", job.command));
                        break;
                    }
                }
            }
        }
    }
    inner.finish_one();
}
