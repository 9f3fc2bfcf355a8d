//! The platform-neutral façade: owns the root→watch-point map, owns the
//! single backend thread, and mediates `startWatching`/`stopWatching`/`close`
//! across threads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{Backend, Request, WakeFn};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::path_codec::normalize_root;
use crate::sink::EventSink;
use crate::watch_point::{Status, WatchPoint};

#[cfg(target_os = "linux")]
type RecommendedBackend = crate::backend::linux::InotifyBackend;
#[cfg(target_os = "macos")]
type RecommendedBackend = crate::backend::macos::FsEventBackend;
#[cfg(target_os = "windows")]
type RecommendedBackend = crate::backend::windows::WindowsBackend;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
type RecommendedBackend = crate::backend::null::NullBackend;

/// How long `startWatching`/`stopWatching` block before giving up on the
/// backend and returning to the caller anyway. A timed-out call does not
/// cancel the underlying transition; the Watch Point continues toward
/// whatever state the backend was already driving it to.
const CONTROL_PLANE_DEADLINE: Duration = Duration::from_secs(30);

/// The platform-neutral façade described by the component design: owns the
/// map of roots to Watch Points, owns the backend thread, mediates
/// start/stop/close across threads, enforces at-most-one backend thread per
/// Server.
pub struct Server {
    request_tx: Sender<Request>,
    wake: WakeFn,
    roots: Mutex<HashMap<PathBuf, Arc<WatchPoint>>>,
    closed: AtomicBool,
    backend_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Spawn the backend thread and block until it either signals ready
    /// (empty watch set, pump entered) or fails with an initialization
    /// error.
    pub fn start(sink: impl EventSink, config: Config) -> Result<Self> {
        Self::start_with_backend::<RecommendedBackend>(sink, config)
    }

    fn start_with_backend<B: Backend>(sink: impl EventSink, config: Config) -> Result<Self> {
        let (request_tx, request_rx): (Sender<Request>, Receiver<Request>) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = sync_channel(1);

        let boxed_sink: Box<dyn EventSink> = Box::new(sink);
        let backend_thread = std::thread::Builder::new()
            .name("notify-server backend".into())
            .spawn(move || B::run(config, boxed_sink, request_rx, ready_tx))
            .map_err(Error::io)?;

        let wake = ready_rx
            .recv()
            .map_err(|_| Error::generic("backend thread exited before signalling ready"))??;

        Ok(Self {
            request_tx,
            wake,
            roots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            backend_thread: Some(backend_thread),
        })
    }

    /// Begin watching `root`. Blocks until the Watch Point leaves
    /// `Uninitialized`. Fails synchronously with `InvalidPath` if `root`
    /// cannot be canonicalised or is not a directory, with `AlreadyWatching`
    /// if the (normalised) root is already in the map, and with `Closed` if
    /// `close()` has already completed.
    pub fn start_watching(&self, root: &Path) -> Result<()> {
        self.check_open()?;
        let root = normalize_root(root)?;
        if !root.is_dir() {
            return Err(Error::invalid_path().add_path(root));
        }

        let watch_point = {
            let mut roots = self.roots.lock().unwrap_or_else(|p| p.into_inner());
            if roots.contains_key(&root) {
                return Err(Error::already_watching().add_path(root));
            }
            let watch_point = Arc::new(WatchPoint::new(root.clone()));
            roots.insert(root.clone(), Arc::clone(&watch_point));
            watch_point
        };

        self.post(Request::Watch(Arc::clone(&watch_point)));

        match watch_point.await_listening_started(CONTROL_PLANE_DEADLINE) {
            Status::Listening => Ok(()),
            Status::FailedToListen => {
                self.roots.lock().unwrap_or_else(|p| p.into_inner()).remove(&root);
                Err(Error::backend_fault("OS refused the watch subscription").add_path(root))
            }
            // Still `Uninitialized`: the deadline elapsed. The Watch Point
            // keeps transitioning; we simply stop waiting on it.
            _ => Err(Error::generic("timed out waiting for the watch to arm").add_path(root)),
        }
    }

    /// Stop watching `root`. Blocks until the Watch Point reaches `Finished`
    /// or the deadline elapses; a timeout releases the caller without
    /// cancelling the underlying transition. Fails with `NotWatching` if the
    /// root is unknown, or `Closed` if `close()` has already completed.
    pub fn stop_watching(&self, root: &Path) -> Result<()> {
        self.check_open()?;
        let root = normalize_root(root)?;

        let watch_point = {
            let mut roots = self.roots.lock().unwrap_or_else(|p| p.into_inner());
            match roots.remove(&root) {
                Some(watch_point) => watch_point,
                None => return Err(Error::not_watching().add_path(root)),
            }
        };

        self.post(Request::Unwatch(root.clone(), Arc::clone(&watch_point)));
        watch_point.await_status(CONTROL_PLANE_DEADLINE, |status| status == Status::Finished);
        Ok(())
    }

    /// Post a terminate request that also cancels all Watch Points; blocks
    /// until the backend thread exits. After return, further operations
    /// fail with `Closed`.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.post(Request::Terminate);
        if let Some(handle) = self.backend_thread.take() {
            if let Err(panic) = handle.join() {
                log::error!("backend thread panicked during close(): {panic:?}");
            }
        }
    }

    fn post(&self, request: Request) {
        if self.request_tx.send(request).is_ok() {
            (self.wake)();
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::closed())
        } else {
            Ok(())
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::event::Event;
    use crate::sink::{EventSink, SinkClosed};
    use std::sync::mpsc;

    fn start_null() -> (Server, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let sink = move |event: Event| -> std::result::Result<(), SinkClosed> {
            tx.send(event).map_err(|_| SinkClosed)
        };
        let server = Server::start_with_backend::<NullBackend>(sink, Config::default()).unwrap();
        (server, rx)
    }

    #[test]
    fn start_watching_nonexistent_path_fails_invalid_path() {
        let (server, _rx) = start_null();
        let err = server.start_watching(Path::new("/definitely/not/a/real/path/xyz")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidPath);
    }

    #[test]
    fn start_watching_twice_fails_already_watching() {
        let (server, _rx) = start_null();
        let dir = tempfile::tempdir().unwrap();
        server.start_watching(dir.path()).unwrap();
        let err = server.start_watching(dir.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyWatching);
    }

    #[test]
    fn stop_watching_unknown_root_fails_not_watching() {
        let (server, _rx) = start_null();
        let dir = tempfile::tempdir().unwrap();
        let err = server.stop_watching(dir.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotWatching);
    }

    #[test]
    fn operations_after_close_fail_closed() {
        let (mut server, _rx) = start_null();
        let dir = tempfile::tempdir().unwrap();
        server.close();
        let err = server.start_watching(dir.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Closed);
    }

    #[test]
    fn start_stop_round_trip_reaches_finished() {
        let (server, _rx) = start_null();
        let dir = tempfile::tempdir().unwrap();
        server.start_watching(dir.path()).unwrap();
        server.stop_watching(dir.path()).unwrap();
        // A second start after a clean stop must succeed again.
        server.start_watching(dir.path()).unwrap();
    }
}
