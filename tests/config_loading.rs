// tests/config_loading.rs

use std::io::Write;

use tempfile::NamedTempFile;

use ci_dispatch::config::{lint_registry, load_and_validate, load_from_str, ConfigIssue, Registry};
use ci_dispatch::errors::CiError;
use ci_dispatch::types::{parse_duration, LockGranularity, StateStorageMode};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_registry_loads_with_defaults_filled_in() {
    let file = write_config(
        r#"
[config]
state_storage = "memory"
poll_interval = "30s"
lock_granularity = "repository"
task_command = "./build.sh"

[repository."github.com/org/website"]
type = "localbuild"
clone_url = "https://github.com/org/website.git"
dependencies = ["github.com/org/theme"]
default_branch = "main"
keep_history = 3

[repository."github.com/org/theme"]
type = "localbuild"
"#,
    );

    let registry = load_and_validate(file.path()).unwrap();

    assert_eq!(registry.config.dispatch_job, "ci-dispatch");
    assert_eq!(registry.config.state_key, "repostats");
    assert_eq!(registry.config.state_storage, StateStorageMode::Memory);
    assert_eq!(registry.config.lock_granularity, LockGranularity::Repository);
    assert_eq!(registry.config.task_command.as_deref(), Some("./build.sh"));
    assert!(!registry.config.queue_if_busy);

    let website = registry.get("github.com/org/website").unwrap();
    assert!(website.depends_on("github.com/org/theme"));
    assert_eq!(website.effective_default_branch(), "main");
    assert_eq!(website.effective_keep_history(), 3);

    let theme = registry.get("github.com/org/theme").unwrap();
    assert_eq!(theme.effective_default_branch(), "master");
    assert_eq!(theme.effective_keep_history(), 7);
    assert!(theme.dependencies.is_empty());
}

#[test]
fn empty_file_is_an_empty_registry() {
    let registry = Registry::try_from(load_from_str("").unwrap()).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn malformed_repository_name_is_a_config_error() {
    let file = write_config(
        r#"
[repository."website"]
type = "localbuild"
"#,
    );

    match load_and_validate(file.path()) {
        Err(CiError::ConfigError(msg)) => assert!(msg.contains("website")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn invalid_global_settings_are_config_errors() {
    for config in [
        "[config]\ndispatch_job = \"\"\n",
        "[config]\npoll_interval = \"soon\"\n",
        "[config]\nstate_key = \" \"\n",
        "[config]\npoll_interval = \"0s\"\n",
        "[config]\npoll_interval = \"0ms\"\n",
        "[config]\npoll_interval = \"6000000000000000h\"\n",
    ] {
        let file = write_config(config);
        assert!(
            matches!(load_and_validate(file.path()), Err(CiError::ConfigError(_))),
            "{config}"
        );
    }
}

#[test]
fn bad_toml_is_a_toml_error() {
    let file = write_config("[repository.\"h/o/r\"\ntype = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(CiError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(matches!(
        load_and_validate("/nonexistent/Repositories.toml"),
        Err(CiError::IoError(_))
    ));
}

#[test]
fn lint_reports_soft_issues_without_failing_the_load() {
    let registry = Registry::try_from(
        load_from_str(
            r#"
[repository."h/o/a"]
type = "ci"
dependencies = ["h/o/b", "h/o/external"]

[repository."h/o/b"]
type = "ci"
dependencies = ["h/o/a"]

[repository."h/o/self"]
type = "ci"
dependencies = ["h/o/self"]

[repository."h/o/untyped"]
clone_url = "https://example.com/untyped.git"
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let issues = lint_registry(&registry);

    assert!(issues.contains(&ConfigIssue::MissingType {
        repository: "h/o/untyped".to_string()
    }));
    assert!(issues.contains(&ConfigIssue::SelfDependency {
        repository: "h/o/self".to_string()
    }));
    let unknown = ConfigIssue::UnknownDependency {
        repository: "h/o/a".to_string(),
        dependency: "h/o/external".to_string(),
    };
    assert!(issues.contains(&unknown));
    assert!(!unknown.is_warning());
    assert!(issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::DependencyCycle { .. })));
}

#[test]
fn lint_warns_about_dependents_reached_along_two_paths() {
    let registry = Registry::try_from(
        load_from_str(
            r#"
[repository."gh/o/a"]
type = "ci"

[repository."gh/o/b"]
type = "ci"
dependencies = ["gh/o/a"]

[repository."gh/o/c"]
type = "ci"
dependencies = ["gh/o/a"]

[repository."gh/o/d"]
type = "ci"
dependencies = ["gh/o/b", "gh/o/c"]
"#,
        )
        .unwrap(),
    )
    .unwrap();

    let issues = lint_registry(&registry);

    let shared = ConfigIssue::SharedDependent {
        repository: "gh/o/a".to_string(),
        dependent: "gh/o/d".to_string(),
    };
    assert!(issues.contains(&shared), "{issues:?}");
    assert!(shared.is_warning());
    assert!(!issues
        .iter()
        .any(|i| matches!(i, ConfigIssue::DependencyCycle { .. })));
    // b, c and d each have at most one path to their dependents.
    assert_eq!(
        issues
            .iter()
            .filter(|i| matches!(i, ConfigIssue::SharedDependent { .. }))
            .count(),
        1
    );
}

#[test]
fn durations_parse_with_units() {
    assert_eq!(parse_duration("500ms").unwrap().as_millis(), 500);
    assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
    assert_eq!(parse_duration("1h").unwrap().as_secs(), 3600);
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("10d").is_err());
    assert!(parse_duration("6000000000000000h").is_err());
    assert!(parse_duration("18446744073709551615m").is_err());
    assert_eq!(parse_duration("0s").unwrap(), std::time::Duration::ZERO);
}
