// src/refs/poller.rs

//! One reconciliation pass over the registry, and the periodic loop around it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::model::{Registry, TYPE_NONE};
use crate::dispatch::{DispatchCommand, JobSpec, ScheduleOp};
use crate::errors::{CiError, Result};
use crate::exec::SchedulerBackend;
use crate::refs::source::RefSource;
use crate::refs::tracker::{reconcile, ChangeEvent, RefSnapshot};
use crate::state::LockedStateStore;

/// A repository whose refs could not be fetched this pass.
#[derive(Debug)]
pub struct RepoFailure {
    pub repository: String,
    pub error: CiError,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Change events of every reconciled repository, in registry order.
    pub events: Vec<ChangeEvent>,
    /// `(repository, ref)` pairs removed from the snapshot.
    pub pruned: Vec<(String, String)>,
    pub failures: Vec<RepoFailure>,
    /// Whether a new snapshot was committed.
    pub committed: bool,
}

impl PassReport {
    /// Events the dispatcher acts on.
    pub fn actionable(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.iter().filter(|e| e.is_actionable())
    }

    pub fn fetch_failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Drives [`reconcile`] over every buildable repository.
///
/// Repositories are fetched and reconciled one at a time. The snapshot is
/// checked out once per pass and committed once at the end.
pub struct Poller<S: RefSource, T: LockedStateStore> {
    registry: Arc<Registry>,
    source: S,
    store: T,
}

impl<S: RefSource, T: LockedStateStore> fmt::Debug for Poller<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("repositories", &self.registry.len())
            .field("state_key", &self.registry.config.state_key)
            .finish_non_exhaustive()
    }
}

impl<S: RefSource, T: LockedStateStore> Poller<S, T> {
    pub fn new(registry: Arc<Registry>, source: S, store: T) -> Self {
        Self {
            registry,
            source,
            store,
        }
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    /// Fetch, reconcile and commit, without dispatching anything.
    ///
    /// A failed fetch only skips that repository. A commit conflict fails
    /// the whole pass with [`CiError::StateConflict`]; nothing from the pass
    /// is kept and the next pass starts from fresh state.
    pub async fn reconcile_pass(&self) -> Result<PassReport> {
        let key = self.registry.config.state_key.as_str();
        let checkout = self.store.checkout(key)?;
        let stored = RefSnapshot::decode(&checkout.value)?;
        let mut snapshot = stored.clone();
        let mut report = PassReport::default();

        for (name, repo) in self.registry.iter() {
            match repo.repo_type.as_deref() {
                None | Some("") => {
                    warn!(repository = %name, "no 'type' specified; not polling");
                    continue;
                }
                Some(TYPE_NONE) => {
                    debug!(repository = %name, "type is 'none'; not polling");
                    continue;
                }
                Some(_) => {}
            }

            debug!(repository = %name, "checking repository");
            let fetched = async {
                let tags = self.source.list_tags(name, repo).await?;
                let branches = self.source.list_branches(name, repo).await?;
                Ok::<_, CiError>((tags, branches))
            }
            .await;

            let (tags, branches) = match fetched {
                Ok(refs) => refs,
                Err(err) => {
                    error!(repository = %name, error = %err, "fetching refs failed");
                    report.failures.push(RepoFailure {
                        repository: name.to_string(),
                        error: err,
                    });
                    continue;
                }
            };

            let outcome = reconcile(name, &tags, &branches, stored.get(name));
            report
                .pruned
                .extend(outcome.pruned.into_iter().map(|r| (name.to_string(), r)));
            report.events.extend(outcome.events);
            snapshot.insert(name, outcome.snapshot);
        }

        if snapshot == stored && checkout.exists {
            debug!("snapshot unchanged; nothing to commit");
            return Ok(report);
        }

        self.store
            .commit(key, &checkout.token, &snapshot.encode()?)
            .inspect_err(|err| error!(error = %err, "unable to save ref snapshot"))?;
        report.committed = true;
        Ok(report)
    }

    /// One full pass: reconcile, then spawn one `build` job per actionable
    /// change. Fetch failures are reported once at the end of the pass.
    pub async fn poll_once<B: SchedulerBackend + ?Sized>(&self, backend: &mut B) -> Result<PassReport> {
        let report = match self.reconcile_pass().await {
            Ok(report) => report,
            Err(err) => {
                backend
                    .submit(ScheduleOp::Report(format!(
                        "There were errors polling repositories: {err}"
                    )))
                    .await?;
                return Err(err);
            }
        };

        let dispatch_job = &self.registry.config.dispatch_job;
        for event in report.actionable() {
            info!(
                repository = %event.repository,
                ref_name = %event.ref_name,
                "ref changed; spawning primary build"
            );
            backend
                .submit(ScheduleOp::SpawnJob(JobSpec::new(
                    dispatch_job.clone(),
                    DispatchCommand::from(event),
                )))
                .await?;
        }

        if report.fetch_failed() {
            let failed: Vec<&str> = report
                .failures
                .iter()
                .map(|f| f.repository.as_str())
                .collect();
            backend
                .submit(ScheduleOp::Report(format!(
                    "There were errors polling repositories: {}",
                    failed.join(", ")
                )))
                .await?;
        }

        Ok(report)
    }

    /// Poll every `interval` until `shutdown` resolves.
    ///
    /// A failed pass is logged and the loop carries on; the next pass reads
    /// fresh state.
    pub async fn run<B: SchedulerBackend + ?Sized>(
        &self,
        backend: &mut B,
        interval: Duration,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(CiError::ConfigError(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        info!(interval = ?interval, "poller started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("poller shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.poll_once(backend).await {
                        Ok(report) => info!(
                            events = report.events.len(),
                            failures = report.failures.len(),
                            "poll pass finished"
                        ),
                        Err(err) if err.is_retryable() => {
                            warn!(error = %err, "poll pass abandoned; retrying next interval")
                        }
                        Err(err) => error!(error = %err, "poll pass failed"),
                    }
                }
            }
        }
    }
}

/// Run `poller` on its own tokio task. Send on the returned channel to stop.
pub fn spawn_poller<S, T, B>(
    poller: Poller<S, T>,
    mut backend: B,
    interval: Duration,
) -> (JoinHandle<Result<()>>, oneshot::Sender<()>)
where
    S: RefSource + 'static,
    T: LockedStateStore + 'static,
    B: SchedulerBackend + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move { poller.run(&mut backend, interval, stop_rx).await });
    (handle, stop_tx)
}
