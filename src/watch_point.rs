//! A single OS subscription bound to a single root directory.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The lifecycle state of a [`WatchPoint`].
///
/// A watch point is reachable from the server's root→watch-point map iff its
/// status is `Listening` or transitioning to/from it; `Finished` is terminal
/// and implies removal from the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Created, but the OS has not yet accepted (or refused) the subscription.
    Uninitialized,
    /// The OS subscription is active; events may be delivered.
    Listening,
    /// `stopWatching` was called; cancellation is in flight and draining.
    NotListening,
    /// All outstanding OS callbacks have completed; the OS resource is released.
    Finished,
    /// The OS refused the subscription outright. Terminal, reported as `Failure`.
    FailedToListen,
}

impl Status {
    /// Whether this status belongs in the server's root→watch-point map.
    pub fn is_mapped(self) -> bool {
        !matches!(self, Status::Finished | Status::FailedToListen)
    }
}

/// One per subscribed root directory; holds the lifecycle state shared
/// between the backend thread (the sole mutator) and control threads that
/// block on transitions.
///
/// The backend-owned OS resource handle itself (an inotify watch descriptor
/// list, a Windows `HANDLE` plus overlapped buffer, or an FSEvents stream
/// reference) lives in the per-platform backend module, keyed by root; this
/// struct only carries the platform-neutral state a control thread needs to
/// synchronise on, so it never needs to know which backend owns it.
#[derive(Debug)]
pub struct WatchPoint {
    root: PathBuf,
    state: Mutex<Status>,
    condvar: Condvar,
}

impl WatchPoint {
    /// Create a new watch point for `root`, born `Uninitialized`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: Mutex::new(Status::Uninitialized),
            condvar: Condvar::new(),
        }
    }

    /// The root path this watch point is bound to.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// The current status.
    pub fn status(&self) -> Status {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Transition to a new status, waking any thread blocked in
    /// [`await_listening_started`](Self::await_listening_started) or
    /// [`await_status`](Self::await_status).
    ///
    /// Called only from the backend thread.
    pub fn set_status(&self, status: Status) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = status;
        self.condvar.notify_all();
    }

    /// Block the caller until status leaves `Uninitialized`; returns the
    /// final status (`Listening` or `FailedToListen`).
    pub fn await_listening_started(&self, deadline: Duration) -> Status {
        self.await_status(deadline, |status| status != Status::Uninitialized)
    }

    /// Block the caller until `predicate(status)` holds or `deadline`
    /// elapses, whichever comes first; returns whatever the status was at
    /// that point.
    pub fn await_status(&self, deadline: Duration, predicate: impl Fn(Status) -> bool) -> Status {
        let start = Instant::now();
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if predicate(*guard) {
                return *guard;
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return *guard;
            }
            let (next_guard, timeout_result) = self
                .condvar
                .wait_timeout(guard, deadline - elapsed)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard = next_guard;
            if timeout_result.timed_out() && !predicate(*guard) {
                return *guard;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn new_watch_point_is_uninitialized() {
        let wp = WatchPoint::new(PathBuf::from("/tmp/w/r"));
        assert_eq!(wp.status(), Status::Uninitialized);
    }

    #[test]
    fn is_mapped_excludes_terminal_states() {
        assert!(Status::Listening.is_mapped());
        assert!(Status::Uninitialized.is_mapped());
        assert!(Status::NotListening.is_mapped());
        assert!(!Status::Finished.is_mapped());
        assert!(!Status::FailedToListen.is_mapped());
    }

    #[test]
    fn await_listening_started_unblocks_on_transition() {
        let wp = Arc::new(WatchPoint::new(PathBuf::from("/tmp/w/r")));
        let wp2 = Arc::clone(&wp);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            wp2.set_status(Status::Listening);
        });
        let status = wp.await_listening_started(Duration::from_secs(5));
        assert_eq!(status, Status::Listening);
        handle.join().unwrap();
    }

    #[test]
    fn await_listening_started_times_out_if_never_armed() {
        let wp = WatchPoint::new(PathBuf::from("/tmp/w/r"));
        let status = wp.await_listening_started(Duration::from_millis(20));
        assert_eq!(status, Status::Uninitialized);
    }
}
