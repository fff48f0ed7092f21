// tests/state_store.rs

use tempfile::tempdir;

use ci_dispatch::errors::CiError;
use ci_dispatch::state::{open_store, FileStateStore, LockedStateStore, MemoryStateStore};
use ci_dispatch::types::StateStorageMode;

fn exercise_checkout_commit(store: &dyn LockedStateStore) {
    let first = store.checkout("repostats").unwrap();
    assert!(!first.exists);
    assert!(first.value.is_empty());

    store.commit("repostats", &first.token, "v1").unwrap();

    let second = store.checkout("repostats").unwrap();
    assert!(second.exists);
    assert_eq!(second.value, "v1");

    // A stale token loses.
    let err = store.commit("repostats", &first.token, "stale").unwrap_err();
    assert!(matches!(err, CiError::StateConflict(ref key) if key == "repostats"));
    assert_eq!(store.checkout("repostats").unwrap().value, "v1");

    store.commit("repostats", &second.token, "v2").unwrap();
    assert_eq!(store.checkout("repostats").unwrap().value, "v2");
}

#[test]
fn memory_store_checkout_commit() {
    exercise_checkout_commit(&MemoryStateStore::new());
}

#[test]
fn file_store_checkout_commit() {
    let dir = tempdir().unwrap();
    exercise_checkout_commit(&FileStateStore::new(dir.path().join("state")));
    assert!(dir.path().join("state/repostats.toml").exists());
}

#[test]
fn file_store_sees_writes_from_other_instances() {
    let dir = tempdir().unwrap();
    let ours = FileStateStore::new(dir.path().to_path_buf());
    let theirs = FileStateStore::new(dir.path().to_path_buf());

    let checkout = ours.checkout("repostats").unwrap();
    let other = theirs.checkout("repostats").unwrap();
    theirs.commit("repostats", &other.token, "theirs").unwrap();

    assert!(matches!(
        ours.commit("repostats", &checkout.token, "ours"),
        Err(CiError::StateConflict(_))
    ));
}

#[test]
fn file_store_rejects_path_like_keys() {
    let dir = tempdir().unwrap();
    let store = FileStateStore::new(dir.path().to_path_buf());
    for key in ["", "../escape", "a/b", ".hidden"] {
        assert!(matches!(store.checkout(key), Err(CiError::ConfigError(_))), "{key}");
    }
}

#[test]
fn open_store_honours_the_mode() {
    let dir = tempdir().unwrap();
    let store = open_store(StateStorageMode::File, dir.path().to_path_buf());
    let checkout = store.checkout("k").unwrap();
    store.commit("k", &checkout.token, "x").unwrap();
    assert!(dir.path().join("k.toml").exists());

    let store = open_store(StateStorageMode::Memory, dir.path().join("unused"));
    let checkout = store.checkout("k").unwrap();
    store.commit("k", &checkout.token, "x").unwrap();
    assert!(!dir.path().join("unused").exists());
}
