// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod dispatch;
pub mod errors;
pub mod exclusive;
pub mod exec;
pub mod logging;
pub mod refs;
pub mod state;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, CliCommand};
use crate::config::loader::load_and_validate;
use crate::config::model::Registry;
use crate::config::validate::lint_registry;
use crate::dispatch::{DispatchCommand, DispatchRuntime, JobSpec, OperatorRequest};
use crate::exclusive::ExclusiveLocks;
use crate::exec::{CommandTaskRunner, HandoffPrinter, LocalScheduler, PlanPrinter, TaskRunner};
use crate::refs::{GitRemoteSource, Poller};
use crate::state::open_store;
use crate::types::parse_duration;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - registry loading and linting
/// - the local scheduler and build task runner
/// - the ref poller (for `poll`)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let registry = load_and_validate(&config_path)
        .with_context(|| format!("loading registry '{}'", config_path.display()))?;
    let registry = Arc::new(registry);
    report_issues(&registry);

    match args.command {
        CliCommand::Check => {
            print_registry(&registry);
            Ok(())
        }

        CliCommand::Dispatch { plan, args } => {
            let command = DispatchCommand::decode(args.as_slice())?;
            if plan {
                let mut runtime = DispatchRuntime::new(registry, PlanPrinter::new());
                runtime.dispatch(&command).await?;
                report_plan(&runtime.into_backend());
                return Ok(());
            }

            let (scheduler, printer) = start_scheduler(&registry);
            // Run as one dispatch job so sequential enqueues share a pipeline.
            scheduler.submit_job(JobSpec::new(
                registry.config.dispatch_job.clone(),
                command,
            ));
            finish(scheduler, printer).await
        }

        CliCommand::Build {
            repository,
            branch,
            pipeline,
            plan,
            extra,
        } => {
            let request = OperatorRequest {
                repo_spec: repository,
                branch,
                pipeline,
                extra_args: extra,
            };
            if plan {
                let mut runtime = DispatchRuntime::new(registry, PlanPrinter::new());
                runtime.request(&request).await?;
                report_plan(&runtime.into_backend());
                return Ok(());
            }

            let (scheduler, printer) = start_scheduler(&registry);
            let mut runtime = DispatchRuntime::new(registry, scheduler);
            runtime.request(&request).await?;
            finish(runtime.into_backend(), printer).await
        }

        CliCommand::Poll { once } => {
            let state_dir = config_root_dir(&config_path).join(&registry.config.state_dir);
            debug!(state_dir = %state_dir.display(), "state directory");
            let store = open_store(registry.config.state_storage, state_dir);
            let poller = Poller::new(registry.clone(), GitRemoteSource::new(), store);
            let (scheduler, printer) = start_scheduler(&registry);
            let mut backend = scheduler.clone();

            if once {
                poller.poll_once(&mut backend).await?;
            } else {
                let interval = parse_duration(&registry.config.poll_interval)
                    .map_err(|e| anyhow!("invalid poll_interval: {e}"))?;
                let (stop_tx, stop_rx) = oneshot::channel();
                spawn_ctrl_c(stop_tx);
                poller.run(&mut backend, interval, stop_rx).await?;
            }

            drop(backend);
            finish(scheduler, printer).await
        }
    }
}

/// Build the scheduler and a task printing its status reports to stdout.
fn start_scheduler(registry: &Arc<Registry>) -> (LocalScheduler, JoinHandle<()>) {
    let runner: Arc<dyn TaskRunner> = match &registry.config.task_command {
        Some(command) => Arc::new(CommandTaskRunner::new(
            command.clone(),
            registry.clone(),
            Arc::new(ExclusiveLocks::new()),
        )),
        None => Arc::new(HandoffPrinter),
    };

    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(message) = status_rx.recv().await {
            println!("{message}");
        }
    });

    (
        LocalScheduler::with_status_channel(registry.clone(), runner, status_tx),
        printer,
    )
}

/// Wait for every started job, then for the last status reports.
async fn finish(scheduler: LocalScheduler, printer: JoinHandle<()>) -> Result<()> {
    scheduler.wait_idle().await;
    info!("all jobs finished");
    drop(scheduler);
    printer.await.context("status printer task")?;
    Ok(())
}

fn spawn_ctrl_c(stop_tx: oneshot::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        let _ = stop_tx.send(());
    });
}

fn report_issues(registry: &Registry) {
    for issue in lint_registry(registry) {
        if issue.is_warning() {
            warn!("{issue}");
        } else {
            debug!("{issue}");
        }
    }
}

fn report_plan(printer: &PlanPrinter) {
    if printer.printed() == 0 {
        info!("nothing to schedule");
    } else {
        debug!(operations = printer.printed(), "plan printed");
    }
}

/// Directory that relative paths in the registry are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "ci/Repositories.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Repositories.toml" (parent = ""),
///   we fall back to the current working directory "."
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// `check` output: global settings, repositories and lint issues.
fn print_registry(registry: &Registry) {
    let config = &registry.config;
    println!("ci-dispatch check");
    println!("  config.dispatch_job = {}", config.dispatch_job);
    println!("  config.state_storage = {:?}", config.state_storage);
    println!("  config.state_key = {}", config.state_key);
    println!("  config.poll_interval = {}", config.poll_interval);
    println!("  config.lock_granularity = {:?}", config.lock_granularity);
    println!("  config.queue_if_busy = {}", config.queue_if_busy);
    if let Some(ref cmd) = config.task_command {
        println!("  config.task_command = {cmd}");
    }
    println!();

    println!("repositories ({}):", registry.len());
    for (name, repo) in registry.iter() {
        println!("  - {name}");
        println!("      type: {}", repo.repo_type.as_deref().unwrap_or("<missing>"));
        if let Some(ref url) = repo.clone_url {
            println!("      clone_url: {url}");
        }
        if !repo.dependencies.is_empty() {
            println!("      dependencies: {:?}", repo.dependencies);
        }
        println!("      default_branch: {}", repo.effective_default_branch());
        println!("      keep_history: {}", repo.effective_keep_history());
    }

    let issues = lint_registry(registry);
    if !issues.is_empty() {
        println!();
        println!("issues ({}):", issues.len());
        for issue in issues {
            println!("  - {issue}");
        }
    }

    debug!("check complete (no execution)");
}
