//! Platform-specific event pumps.
//!
//! Each backend owns exactly one OS-facing thread ("the Backend thread" in
//! the design documents) and is driven entirely through [`Request`]s posted
//! from [`crate::server::Server`]. A backend never talks back to the server
//! except by calling [`EventSink::push`] and by transitioning the
//! [`WatchPoint`] it was handed.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Error;
use crate::event::Event;
use crate::sink::EventSink;
use crate::watch_point::WatchPoint;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
pub mod null;
#[cfg(target_os = "windows")]
pub mod windows;

/// A control-plane request posted to the backend thread.
pub enum Request {
    /// Begin watching `watch_point.root()`. The backend must call
    /// `watch_point.set_status(...)` exactly once to leave `Uninitialized`.
    Watch(Arc<WatchPoint>),
    /// Stop watching `path`; `watch_point` is the one returned from the
    /// matching `Watch` request.
    Unwatch(PathBuf, Arc<WatchPoint>),
    /// Cancel every outstanding watch point and exit the backend thread.
    Terminate,
}

/// The platform-specific wake primitive a backend hands back to the server
/// once it is ready: APC on Windows, eventfd `Waker::wake()` on Linux,
/// `CFRunLoopWakeUp` on macOS. The server calls it after posting every
/// [`Request`] so the backend's blocking OS wait primitive (`SleepEx`
/// alertable, `poll`, `CFRunLoopRun`) returns promptly to drain the channel.
pub type WakeFn = Arc<dyn Fn() + Send + Sync>;

/// What a freshly spawned backend thread reports back to `Server::start`
/// once it has entered its OS wait primitive with an empty watch set: either
/// its wake primitive, or the initialization error that prevented it from
/// getting that far.
pub type ReadySignal = std::sync::mpsc::SyncSender<Result<WakeFn, Error>>;

/// The entry point every platform module implements: block the calling
/// (backend) thread running the OS-specific pump until a [`Request::Terminate`]
/// is processed.
///
/// `config` governs the Windows buffer size and macOS latency used for any
/// watch point armed after this call starts; `sink` is shared with no lock
/// held across a push, per the design's locking discipline; `requests` is
/// drained whenever the backend's wait primitive is woken out-of-band.
pub trait Backend {
    /// Run the backend pump to completion. Returns once `Terminate` has been
    /// fully processed (every watch point reached `Finished`).
    fn run(
        config: Config,
        sink: Box<dyn EventSink>,
        requests: std::sync::mpsc::Receiver<Request>,
        ready: ReadySignal,
    );
}

/// Helper shared by every backend: push an event through the sink.
///
/// A closed sink is never treated as "drop and continue" — `Change`,
/// `Overflow`, and `UnknownEvent` delivery is infallible from the backend's
/// perspective, so a rejected push is surfaced as a best-effort `Failure`
/// event and reported back to the caller via `false`, so the pump can tear
/// its watch points down instead of silently carrying on. The second push
/// is itself allowed to fail silently: if the sink is gone there is no one
/// left to tell.
pub(crate) fn push_or_log(sink: &mut dyn EventSink, event: Event) -> bool {
    if sink.push(event).is_err() {
        log::error!("event sink closed; tearing down this backend's watch points");
        let _ = sink.push(Event::failure(
            crate::error::ErrorKind::Closed,
            "event sink closed, no further events can be delivered",
        ));
        return false;
    }
    true
}
