// tests/exclusive.rs

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use ci_dispatch::dispatch::{Provenance, TaskSpec};
use ci_dispatch::exclusive::{exclusivity_tag, ExclusiveLocks};
use ci_dispatch::exec::{CommandTaskRunner, TaskOutcome, TaskRunner};
use ci_dispatch::types::LockGranularity;
use ci_dispatch_test_utils::builders::{RegistryBuilder, RepoConfigBuilder};
use ci_dispatch_test_utils::{init_tracing, with_timeout};

#[test]
fn tag_granularity() {
    assert_eq!(
        exclusivity_tag("gh/o/a", "main", LockGranularity::Repository),
        "gh/o/a"
    );
    assert_eq!(
        exclusivity_tag("gh/o/a", "main", LockGranularity::Branch),
        "gh/o/a#main"
    );
    assert_ne!(
        exclusivity_tag("gh/o/a", "main", LockGranularity::Branch),
        exclusivity_tag("gh/o/a", "dev", LockGranularity::Branch)
    );
}

#[tokio::test]
async fn simultaneous_acquires_yield_exactly_one_winner() {
    let locks = Arc::new(ExclusiveLocks::new());

    let (first, second) = tokio::join!(
        locks.acquire("gh/o/a#main", false),
        locks.acquire("gh/o/a#main", false)
    );

    assert_eq!(
        [first.is_some(), second.is_some()]
            .iter()
            .filter(|won| **won)
            .count(),
        1
    );
    assert!(locks.is_held("gh/o/a#main"));
}

#[tokio::test]
async fn release_on_drop() {
    let locks = ExclusiveLocks::new();
    let guard = locks.try_acquire("gh/o/a").unwrap();
    assert!(locks.try_acquire("gh/o/a").is_none());
    assert!(locks.try_acquire("gh/o/b").is_some());

    drop(guard);
    assert!(!locks.is_held("gh/o/a"));
    assert!(locks.try_acquire("gh/o/a").is_some());
}

#[tokio::test]
async fn queue_mode_waits_for_the_holder() {
    let locks = Arc::new(ExclusiveLocks::new());
    let guard = locks.try_acquire("gh/o/a").unwrap();

    let waiter = {
        let locks = Arc::clone(&locks);
        tokio::spawn(async move { locks.acquire("gh/o/a", true).await.is_some() })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    assert!(with_timeout(waiter).await.unwrap());
}

#[tokio::test]
async fn released_tags_are_forgotten() {
    let locks = Arc::new(ExclusiveLocks::new());
    for branch in ["main", "dev", "feature/x"] {
        let guard = locks.try_acquire(&format!("gh/o/a#{branch}")).unwrap();
        assert_eq!(guard.tag(), format!("gh/o/a#{branch}"));
    }
    assert_eq!(locks.tracked_tags(), 0);

    let held = locks.try_acquire("gh/o/a#main").unwrap();
    let waiter = {
        let locks = Arc::clone(&locks);
        tokio::spawn(async move {
            let guard = locks.acquire("gh/o/a#main", true).await;
            guard.is_some()
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The waiter keeps the entry alive across the holder's release.
    drop(held);
    assert!(with_timeout(waiter).await.unwrap());
    assert_eq!(locks.tracked_tags(), 0);
    assert!(locks.try_acquire("gh/o/a#main").is_some());
}

fn task(repo: &str, branch: &str) -> TaskSpec {
    TaskSpec::primary("ci", repo, branch)
}

fn runner(command: String, locks: Arc<ExclusiveLocks>) -> CommandTaskRunner {
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/a", RepoConfigBuilder::new("ci").keep_history(3).build())
        .build();
    CommandTaskRunner::new(command, Arc::new(registry), locks)
}

#[tokio::test]
async fn busy_tag_skips_without_side_effects() {
    init_tracing();
    let dir = tempdir().unwrap();
    let marker = dir.path().join("ran");
    let locks = Arc::new(ExclusiveLocks::new());
    let _held = locks.try_acquire("gh/o/a#main").unwrap();

    let runner = runner(format!("touch '{}'", marker.display()), Arc::clone(&locks));
    let outcome = with_timeout(runner.run_task(task("gh/o/a", "main"))).await;

    assert_eq!(outcome, TaskOutcome::Skipped);
    assert!(!marker.exists());
}

#[tokio::test]
async fn task_command_receives_arguments_and_environment() {
    init_tracing();
    let dir = tempdir().unwrap();
    let args_file = dir.path().join("args");
    let env_file = dir.path().join("env");
    let command = format!(
        "env > '{}'; printf '%s|' > '{}'",
        env_file.display(),
        args_file.display()
    );
    let runner = runner(command, Arc::new(ExclusiveLocks::new()));

    let mut spec = task("gh/o/a", "main");
    spec.triggered_by = Some(Provenance {
        repository: "gh/o/base".to_string(),
        branch: "dev".to_string(),
    });
    let outcome = with_timeout(runner.run_task(spec)).await;
    assert_eq!(outcome, TaskOutcome::Success);

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(args, "gh/o/a|main|gh/o/base|dev|");

    let env = std::fs::read_to_string(&env_file).unwrap();
    for expected in [
        "CI_DISPATCH_REPO=gh/o/a",
        "CI_DISPATCH_BRANCH=main",
        "CI_DISPATCH_DEPBUILD=true",
        "CI_DISPATCH_DEPREPO=gh/o/base",
        "CI_DISPATCH_DEPBRANCH=dev",
        "CI_DISPATCH_KEEP_HISTORY=3",
    ] {
        assert!(env.lines().any(|l| l == expected), "missing {expected}");
    }
}

#[tokio::test]
async fn failing_command_is_a_failed_outcome_and_releases_the_tag() {
    init_tracing();
    let locks = Arc::new(ExclusiveLocks::new());
    let runner = runner("false".to_string(), Arc::clone(&locks));

    let outcome = with_timeout(runner.run_task(task("gh/o/a", "main"))).await;

    assert_eq!(outcome, TaskOutcome::Failed(1));
    assert!(!locks.is_held("gh/o/a#main"));
}

#[tokio::test]
async fn output_is_drained_before_the_task_completes() {
    init_tracing();
    let locks = Arc::new(ExclusiveLocks::new());
    // Well past a pipe buffer on both streams.
    let command = "i=0; while [ $i -lt 3000 ]; do echo \"line $i of the build log\"; echo \"warn $i\" >&2; i=$((i+1)); done; true".to_string();
    let runner = runner(command, Arc::clone(&locks));

    let outcome = with_timeout(runner.run_task(task("gh/o/a", "main"))).await;

    assert_eq!(outcome, TaskOutcome::Success);
    assert_eq!(locks.tracked_tags(), 0);
}
