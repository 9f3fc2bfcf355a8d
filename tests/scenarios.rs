//! End-to-end scenarios against the real Linux backend, using temporary
//! directories. Gated to Linux because it is the only backend this crate can
//! exercise without a GUI session or a Windows host.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use pretty_assertions::assert_eq;

use notify_server::{ChangeKind, Config, Event, ErrorKind, Server};

/// Surface `RUST_LOG` output for a failing test, matching the demo harness.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start() -> (Server, crossbeam_channel::Receiver<Event>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let server = Server::start(tx, Config::default()).expect("server starts");
    (server, rx)
}

fn recv_change(rx: &crossbeam_channel::Receiver<Event>, timeout: Duration) -> Option<(ChangeKind, PathBuf)> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match rx.recv_timeout(remaining) {
            Ok(Event::Change { kind, path }) => return Some((kind, path)),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[test]
fn scenario_1_create_file_emits_created() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (server, rx) = start();
    server.start_watching(dir.path()).unwrap();

    let file = dir.path().join("a.txt");
    fs::write(&file, "").unwrap();

    let (kind, path) = recv_change(&rx, Duration::from_secs(5)).expect("a Change event");
    assert_eq!(kind, ChangeKind::Created);
    assert_eq!(path, file);
}

#[test]
fn scenario_2_write_emits_modified() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, "").unwrap();

    let (server, rx) = start();
    server.start_watching(dir.path()).unwrap();

    fs::write(&file, "hi").unwrap();

    let mut saw_modified = false;
    while let Some((kind, path)) = recv_change(&rx, Duration::from_secs(2)) {
        if kind == ChangeKind::Modified && path == file {
            saw_modified = true;
            break;
        }
    }
    assert!(saw_modified, "expected at least one Modified event for {}", file.display());
}

#[test]
fn scenario_3_rename_emits_removed_then_created() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("a.txt");
    let to = dir.path().join("b.txt");
    fs::write(&from, "").unwrap();

    let (server, rx) = start();
    server.start_watching(dir.path()).unwrap();

    fs::rename(&from, &to).unwrap();

    let mut events = Vec::new();
    while let Some(event) = recv_change(&rx, Duration::from_secs(2)) {
        events.push(event);
        if events.len() >= 2 {
            break;
        }
    }

    assert!(events.iter().any(|(kind, path)| *kind == ChangeKind::Removed && *path == from));
    assert!(events.iter().any(|(kind, path)| *kind == ChangeKind::Created && *path == to));
}

#[test]
fn scenario_4_deleted_root_invalidates_and_then_stop_watching_is_clean() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let (server, rx) = start();
    server.start_watching(&root).unwrap();

    fs::remove_dir_all(&root).unwrap();

    let mut saw_invalidated = false;
    while let Some((kind, path)) = recv_change(&rx, Duration::from_secs(5)) {
        if kind == ChangeKind::Invalidated && path == root {
            saw_invalidated = true;
            break;
        }
    }
    assert!(saw_invalidated, "expected an Invalidated Change for the deleted root");

    // The root is gone; the server no longer maps it once the backend
    // finishes the watch point, so a further stop_watching fails cleanly
    // rather than hanging.
    let result = server.stop_watching(&root);
    assert!(result.is_ok() || matches!(result, Err(ref e) if e.kind == ErrorKind::NotWatching));
}

#[test]
fn scenario_6_closed_server_rejects_further_watches() {
    init_logging();
    let (mut server, _rx) = start();
    let dir = tempfile::tempdir().unwrap();
    server.start_watching(dir.path()).unwrap();
    server.close();

    let other = tempfile::tempdir().unwrap();
    let err = server.start_watching(other.path()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Closed);
}

#[test]
fn watching_same_root_twice_fails_already_watching() {
    init_logging();
    let (server, _rx) = start();
    let dir = tempfile::tempdir().unwrap();
    server.start_watching(dir.path()).unwrap();
    let err = server.start_watching(dir.path()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyWatching);
}

#[test]
fn stop_then_start_produces_no_stray_events_for_untouched_root() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (server, rx) = start();
    server.start_watching(dir.path()).unwrap();
    server.stop_watching(dir.path()).unwrap();

    assert!(recv_change(&rx, Duration::from_millis(200)).is_none());
}

#[test]
fn chmod_only_change_emits_modified() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, "content").unwrap();

    let (server, rx) = start();
    server.start_watching(dir.path()).unwrap();

    // A permission change with no write to the file's contents still has to
    // surface as `Modified` — inotify reports it via `IN_ATTRIB`, which this
    // backend folds into the same `ChangeKind` as a content write.
    nix::sys::stat::fchmodat(
        None,
        &file,
        nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR,
        nix::sys::stat::FchmodAtFlags::FollowSymlink,
    )
    .unwrap();

    let mut saw_modified = false;
    while let Some((kind, path)) = recv_change(&rx, Duration::from_secs(2)) {
        if kind == ChangeKind::Modified && path == file {
            saw_modified = true;
            break;
        }
    }
    assert_eq!(saw_modified, true, "expected a Modified event for a chmod-only change to {}", file.display());
}

#[test]
fn symlinked_subdirectory_is_followed_by_default() {
    init_logging();
    let root = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let link = root.path().join("link");
    nix::unistd::symlinkat(target.path(), None, &link).unwrap();

    // `Config::default()` follows symlinks, so the eager recursive walk on
    // `start_watching` must arm a watch through `link` and into `target`.
    let (server, rx) = start();
    server.start_watching(root.path()).unwrap();

    let file = link.join("through_link.txt");
    fs::write(&file, "").unwrap();

    let (kind, path) = recv_change(&rx, Duration::from_secs(5)).expect("a Change event through the symlink");
    assert_eq!(kind, ChangeKind::Created);
    assert_eq!(path, file);
}
