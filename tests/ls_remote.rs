// tests/ls_remote.rs

use ci_dispatch::config::RepoConfig;
use ci_dispatch::errors::CiError;
use ci_dispatch::refs::{parse_ls_remote, GitRemoteSource, RefSource, RemoteRef};

const TAGS: &str = "\
1111111111111111111111111111111111111111\trefs/tags/v1.0
2222222222222222222222222222222222222222\trefs/tags/v1.0^{}
3333333333333333333333333333333333333333\trefs/tags/v1.1
";

const HEADS: &str = "\
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\trefs/heads/main
bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\trefs/heads/feature/x
cccccccccccccccccccccccccccccccccccccccc\tHEAD
";

#[test]
fn annotated_tags_resolve_to_the_peeled_commit() {
    let tags = parse_ls_remote(TAGS, "refs/tags/");
    assert_eq!(
        tags,
        vec![
            RemoteRef::new("v1.0", "2222222222222222222222222222222222222222"),
            RemoteRef::new("v1.1", "3333333333333333333333333333333333333333"),
        ]
    );
}

#[test]
fn heads_keep_slashes_and_ignore_other_refs() {
    let heads = parse_ls_remote(HEADS, "refs/heads/");
    let names: Vec<&str> = heads.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["feature/x", "main"]);
}

#[test]
fn blank_and_garbage_lines_are_skipped() {
    assert!(parse_ls_remote("\n\nnot-a-ref-line\n", "refs/heads/").is_empty());
}

#[tokio::test]
async fn missing_clone_url_is_a_config_error() {
    let source = GitRemoteSource::new();
    let repo = RepoConfig {
        repo_type: Some("ci".to_string()),
        ..RepoConfig::default()
    };
    let err = source.list_tags("gh/o/a", &repo).await.unwrap_err();
    assert!(matches!(err, CiError::ConfigError(_)));
}

#[tokio::test]
async fn unavailable_git_is_a_transient_fetch_failure() {
    let source = GitRemoteSource::with_git_binary("/nonexistent/git");
    let repo = RepoConfig {
        repo_type: Some("ci".to_string()),
        clone_url: Some("https://example.invalid/o/a.git".to_string()),
        ..RepoConfig::default()
    };
    let err = source.list_branches("gh/o/a", &repo).await.unwrap_err();
    assert!(matches!(err, CiError::TransientFetch { ref repository, .. } if repository == "gh/o/a"));
    assert!(err.is_retryable());
}
