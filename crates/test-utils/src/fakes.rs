#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use ci_dispatch::config::RepoConfig;
use ci_dispatch::dispatch::{ScheduleOp, TaskSpec};
use ci_dispatch::errors::CiError;
use ci_dispatch::exec::{SchedulerBackend, SubmitFuture, TaskFuture, TaskOutcome, TaskRunner};
use ci_dispatch::refs::{RefListFuture, RefSource, RemoteRef};

/// A scheduler backend that records every submitted operation.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    ops: Arc<Mutex<Vec<ScheduleOp>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<ScheduleOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ScheduleOp::Report(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.ops.lock().unwrap().clear();
    }
}

impl SchedulerBackend for RecordingBackend {
    fn submit(&mut self, op: ScheduleOp) -> SubmitFuture<'_> {
        let ops = Arc::clone(&self.ops);
        Box::pin(async move {
            ops.lock().unwrap().push(op);
            Ok(())
        })
    }
}

#[derive(Default)]
struct RefState {
    tags: HashMap<String, Vec<RemoteRef>>,
    branches: HashMap<String, Vec<RemoteRef>>,
    failing_tags: HashSet<String>,
    failing_branches: HashSet<String>,
    calls: Vec<String>,
}

/// A ref source serving canned listings.
///
/// Clones share state, so a test can keep a handle after moving one into a
/// poller and change what the "remote" returns between passes.
#[derive(Clone, Default)]
pub struct StaticRefSource {
    state: Arc<Mutex<RefState>>,
}

impl StaticRefSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tags(&self, repository: &str, tags: &[(&str, &str)]) {
        self.state
            .lock()
            .unwrap()
            .tags
            .insert(repository.to_string(), to_refs(tags));
    }

    pub fn set_branches(&self, repository: &str, branches: &[(&str, &str)]) {
        self.state
            .lock()
            .unwrap()
            .branches
            .insert(repository.to_string(), to_refs(branches));
    }

    /// Make the tag listing of `repository` fail.
    pub fn fail_tags(&self, repository: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_tags
            .insert(repository.to_string());
    }

    /// Make the branch listing of `repository` fail.
    pub fn fail_branches(&self, repository: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_branches
            .insert(repository.to_string());
    }

    pub fn heal(&self, repository: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing_tags.remove(repository);
        state.failing_branches.remove(repository);
    }

    /// `"tags <repo>"` / `"branches <repo>"` for every listing requested.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn list(&self, kind: &str, repository: &str) -> Result<Vec<RemoteRef>, CiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{kind} {repository}"));
        let (failing, refs) = match kind {
            "tags" => (&state.failing_tags, &state.tags),
            _ => (&state.failing_branches, &state.branches),
        };
        if failing.contains(repository) {
            return Err(CiError::TransientFetch {
                repository: repository.to_string(),
                reason: format!("listing {kind} failed"),
            });
        }
        Ok(refs.get(repository).cloned().unwrap_or_default())
    }
}

impl RefSource for StaticRefSource {
    fn list_tags<'a>(&'a self, repository: &'a str, _repo: &'a RepoConfig) -> RefListFuture<'a> {
        let result = self.list("tags", repository);
        Box::pin(async move { result })
    }

    fn list_branches<'a>(
        &'a self,
        repository: &'a str,
        _repo: &'a RepoConfig,
    ) -> RefListFuture<'a> {
        let result = self.list("branches", repository);
        Box::pin(async move { result })
    }
}

fn to_refs(pairs: &[(&str, &str)]) -> Vec<RemoteRef> {
    pairs
        .iter()
        .map(|(name, commit)| RemoteRef::new(*name, *commit))
        .collect()
}

#[derive(Default)]
struct RunnerState {
    started: Vec<TaskSpec>,
    finished: Vec<TaskSpec>,
    outcomes: HashMap<String, TaskOutcome>,
    holds: HashMap<String, Arc<Semaphore>>,
}

/// A task runner that records tasks instead of running anything.
///
/// Outcomes default to success and can be set per repository. A repository
/// can be "held": its tasks start but block until [`FakeTaskRunner::release`].
#[derive(Clone, Default)]
pub struct FakeTaskRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl FakeTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outcome(&self, repository: &str, outcome: TaskOutcome) {
        self.state
            .lock()
            .unwrap()
            .outcomes
            .insert(repository.to_string(), outcome);
    }

    pub fn hold(&self, repository: &str) {
        self.state
            .lock()
            .unwrap()
            .holds
            .insert(repository.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, repository: &str) {
        if let Some(sem) = self.state.lock().unwrap().holds.get(repository) {
            sem.add_permits(1 << 20);
        }
    }

    pub fn started(&self) -> Vec<TaskSpec> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn finished(&self) -> Vec<TaskSpec> {
        self.state.lock().unwrap().finished.clone()
    }

    /// `"<repo> <branch>"` of every started task, in start order.
    pub fn started_names(&self) -> Vec<String> {
        self.started()
            .iter()
            .map(|t| format!("{} {}", t.repository, t.branch))
            .collect()
    }
}

impl TaskRunner for FakeTaskRunner {
    fn run_task(&self, task: TaskSpec) -> TaskFuture<'_> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let hold = {
                let mut guard = state.lock().unwrap();
                guard.started.push(task.clone());
                guard.holds.get(&task.repository).cloned()
            };

            if let Some(sem) = hold {
                let _permit = sem.acquire().await.unwrap();
            }

            let mut guard = state.lock().unwrap();
            let outcome = guard
                .outcomes
                .get(&task.repository)
                .copied()
                .unwrap_or(TaskOutcome::Success);
            guard.finished.push(task);
            outcome
        })
    }
}
