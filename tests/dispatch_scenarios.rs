// tests/dispatch_scenarios.rs

use std::sync::Arc;

use ci_dispatch::dispatch::{
    BuildDispatcher, DispatchCommand, DispatchOutcome, DispatchRuntime, JobSpec, Provenance,
    ScheduleOp, TaskSpec, MAX_CASCADE_DEPTH,
};
use ci_dispatch::errors::CiError;
use ci_dispatch_test_utils::builders::{two_repo_registry, RegistryBuilder, RepoConfigBuilder};
use ci_dispatch_test_utils::fakes::RecordingBackend;
use ci_dispatch_test_utils::init_tracing;

fn build(repo: &str, branch: &str) -> DispatchCommand {
    DispatchCommand::Build {
        repository: repo.to_string(),
        branch: branch.to_string(),
    }
}

#[test]
fn primary_build_then_sequential_builddeps_then_parallel_depbuild() {
    init_tracing();
    let registry = two_repo_registry();
    let dispatcher = BuildDispatcher::new(&registry);

    let step = dispatcher.step(&build("gh/o/a", "main")).unwrap();
    assert_eq!(
        step.ops,
        vec![
            ScheduleOp::EnqueueTask(TaskSpec::primary("ci", "gh/o/a", "main")),
            ScheduleOp::EnqueueJob(JobSpec::new(
                "ci-dispatch",
                DispatchCommand::BuildDeps {
                    repository: "gh/o/a".to_string(),
                    branch: "main".to_string(),
                    depth: 1,
                },
            )),
        ]
    );

    // The follow-on job runs later, as its own step.
    let follow_on = step.enqueued_jobs().next().unwrap().command.clone();
    let step = dispatcher.step(&follow_on).unwrap();
    assert_eq!(
        step.ops,
        vec![ScheduleOp::SpawnJob(JobSpec::new(
            "ci-dispatch",
            DispatchCommand::DepBuild {
                repository: "gh/o/b".to_string(),
                branch: "develop".to_string(),
                triggering_repository: "gh/o/a".to_string(),
                triggering_branch: "main".to_string(),
                depth: 1,
            },
        ))]
    );

    // The dependent build carries its provenance and has nothing further.
    let depbuild = step.spawned_jobs().next().unwrap().command.clone();
    let step = dispatcher.step(&depbuild).unwrap();
    let tasks: Vec<&TaskSpec> = step.tasks().collect();
    assert_eq!(step.ops.len(), 1);
    assert_eq!(tasks[0].repository, "gh/o/b");
    assert_eq!(tasks[0].branch, "develop");
    assert_eq!(
        tasks[0].triggered_by,
        Some(Provenance {
            repository: "gh/o/a".to_string(),
            branch: "main".to_string()
        })
    );
}

#[test]
fn build_of_type_none_repository_does_nothing() {
    init_tracing();
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/docs", RepoConfigBuilder::new("none").build())
        .build();

    let step = BuildDispatcher::new(&registry)
        .step(&build("gh/o/docs", "main"))
        .unwrap();
    assert!(step.is_empty());
}

#[test]
fn build_of_unlisted_repository_does_nothing() {
    let registry = two_repo_registry();
    let step = BuildDispatcher::new(&registry)
        .step(&build("gh/o/unknown", "main"))
        .unwrap();
    assert!(step.is_empty());
}

#[test]
fn build_without_dependents_has_no_follow_on() {
    let registry = two_repo_registry();
    let step = BuildDispatcher::new(&registry)
        .step(&build("gh/o/b", "main"))
        .unwrap();
    assert_eq!(step.ops.len(), 1);
    assert_eq!(step.enqueued_jobs().count(), 0);
}

#[test]
fn build_of_untyped_repository_is_a_config_error() {
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/odd", RepoConfigBuilder::untyped().build())
        .build();
    let err = BuildDispatcher::new(&registry)
        .step(&build("gh/o/odd", "main"))
        .unwrap_err();
    assert!(matches!(err, CiError::ConfigError(_)));
}

#[test]
fn cycle_aborts_the_whole_dispatch() {
    init_tracing();
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/a", RepoConfigBuilder::new("ci").depends_on("gh/o/b").build())
        .with_repo("gh/o/b", RepoConfigBuilder::new("ci").depends_on("gh/o/a").build())
        .build();

    let err = BuildDispatcher::new(&registry)
        .step(&build("gh/o/a", "main"))
        .unwrap_err();
    assert!(matches!(err, CiError::DependencyCycle(_)));
}

#[test]
fn builddeps_fans_out_one_independent_job_per_dependent() {
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/lib", RepoConfigBuilder::new("ci").build())
        .with_repo("gh/o/app1", RepoConfigBuilder::new("ci").depends_on("gh/o/lib").build())
        .with_repo(
            "gh/o/app2",
            RepoConfigBuilder::new("ci")
                .depends_on("gh/o/lib")
                .default_branch("main")
                .build(),
        )
        .with_repo("gh/o/site", RepoConfigBuilder::new("none").depends_on("gh/o/lib").build())
        .build();

    let step = BuildDispatcher::new(&registry)
        .step(&DispatchCommand::BuildDeps {
            repository: "gh/o/lib".to_string(),
            branch: "release".to_string(),
            depth: 1,
        })
        .unwrap();

    let spawned: Vec<(String, String)> = step
        .spawned_jobs()
        .map(|j| (j.command.repository().to_string(), j.command.branch().to_string()))
        .collect();
    assert_eq!(
        spawned,
        vec![
            ("gh/o/app1".to_string(), "master".to_string()),
            ("gh/o/app2".to_string(), "main".to_string()),
        ]
    );
    assert_eq!(step.ops.len(), 2, "only spawns, nothing sequential");
}

#[test]
fn cascade_stops_one_level_beyond_the_dependent() {
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/a", RepoConfigBuilder::new("ci").build())
        .with_repo("gh/o/b", RepoConfigBuilder::new("ci").depends_on("gh/o/a").build())
        .with_repo("gh/o/c", RepoConfigBuilder::new("ci").depends_on("gh/o/b").build())
        .with_repo("gh/o/d", RepoConfigBuilder::new("ci").depends_on("gh/o/c").build())
        .build();
    let dispatcher = BuildDispatcher::new(&registry);

    let depbuild = |repo: &str, trig: &str, depth: u8| DispatchCommand::DepBuild {
        repository: repo.to_string(),
        branch: "master".to_string(),
        triggering_repository: trig.to_string(),
        triggering_branch: "master".to_string(),
        depth,
    };

    // b at depth 1 may cascade once more.
    let step = dispatcher.step(&depbuild("gh/o/b", "gh/o/a", 1)).unwrap();
    let follow: Vec<&JobSpec> = step.enqueued_jobs().collect();
    assert_eq!(follow.len(), 1);
    assert_eq!(
        follow[0].command,
        DispatchCommand::BuildDeps {
            repository: "gh/o/b".to_string(),
            branch: "master".to_string(),
            depth: 2,
        }
    );

    // c at the maximum depth builds but does not cascade to d.
    let step = dispatcher
        .step(&depbuild("gh/o/c", "gh/o/b", MAX_CASCADE_DEPTH))
        .unwrap();
    assert_eq!(step.tasks().count(), 1);
    assert_eq!(step.enqueued_jobs().count(), 0);
    assert_eq!(step.spawned_jobs().count(), 0);
}

#[test]
fn job_runs_the_named_pipeline_with_extra_args() {
    let registry = two_repo_registry();
    let step = BuildDispatcher::new(&registry)
        .step(&DispatchCommand::Job {
            repository: "gh/o/a".to_string(),
            branch: "main".to_string(),
            pipeline: "deploy".to_string(),
            extra_args: vec!["prod".to_string(), "--force".to_string()],
        })
        .unwrap();

    let task = step.tasks().next().unwrap();
    assert_eq!(task.pipeline.as_deref(), Some("deploy"));
    assert_eq!(task.args(), vec!["gh/o/a", "main", "deploy", "prod", "--force"]);
    assert_eq!(step.ops.len(), 1);
}

#[test]
fn job_for_unlisted_or_untyped_repository_is_a_config_error() {
    let registry = RegistryBuilder::new()
        .with_repo("gh/o/odd", RepoConfigBuilder::untyped().build())
        .build();
    let dispatcher = BuildDispatcher::new(&registry);

    for repo in ["gh/o/odd", "gh/o/missing"] {
        let err = dispatcher
            .step(&DispatchCommand::Job {
                repository: repo.to_string(),
                branch: "main".to_string(),
                pipeline: "deploy".to_string(),
                extra_args: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, CiError::ConfigError(_)), "{repo}: {err}");
    }
}

#[tokio::test]
async fn runtime_reports_rejections_instead_of_failing() {
    init_tracing();
    let registry = Arc::new(
        RegistryBuilder::new()
            .with_repo("gh/o/a", RepoConfigBuilder::new("ci").depends_on("gh/o/b").build())
            .with_repo("gh/o/b", RepoConfigBuilder::new("ci").depends_on("gh/o/a").build())
            .build(),
    );
    let backend = RecordingBackend::new();
    let mut runtime = DispatchRuntime::new(registry, backend.clone());

    let outcome = runtime.dispatch(&build("gh/o/a", "main")).await.unwrap();

    assert!(matches!(outcome, DispatchOutcome::Rejected(_)));
    let ops = backend.ops();
    assert_eq!(ops.len(), 1, "only the report, no partial builds");
    assert!(matches!(&ops[0], ScheduleOp::Report(msg) if msg.contains("cycle")));
}

#[tokio::test]
async fn runtime_submits_ops_in_order() {
    let backend = RecordingBackend::new();
    let mut runtime = DispatchRuntime::new(Arc::new(two_repo_registry()), backend.clone());

    let outcome = runtime.dispatch(&build("gh/o/a", "main")).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Submitted(2));
    assert!(matches!(backend.ops()[0], ScheduleOp::EnqueueTask(_)));
    assert!(matches!(backend.ops()[1], ScheduleOp::EnqueueJob(_)));

    backend.clear();
    let outcome = runtime.dispatch(&build("gh/o/nope", "main")).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::NothingToDo);
    assert!(backend.ops().is_empty());
}

#[tokio::test]
async fn plan_printer_counts_the_printed_operations() {
    init_tracing();
    let mut runtime = DispatchRuntime::new(
        Arc::new(two_repo_registry()),
        ci_dispatch::exec::PlanPrinter::new(),
    );

    runtime.dispatch(&build("gh/o/a", "main")).await.unwrap();
    runtime.dispatch(&build("gh/o/unknown", "main")).await.unwrap();

    assert_eq!(runtime.into_backend().printed(), 2);
}
