//! Stub backend.
//!
//! Accepts watch/unwatch requests and immediately arms or finishes the
//! affected watch point, but never observes real file-system activity. Used
//! on targets with no native backend implemented, and directly by the
//! server's own unit tests that only exercise the control-plane state
//! machine and do not need genuine OS events.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use super::{Backend, ReadySignal, Request};
use crate::config::Config;
use crate::sink::EventSink;
use crate::watch_point::Status;

/// The stub backend.
#[derive(Debug)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn run(_config: Config, _sink: Box<dyn EventSink>, requests: Receiver<Request>, ready: ReadySignal) {
        // No real OS wait primitive: the backend thread blocks directly on
        // `requests.recv()`, so waking it is a no-op.
        let _ = ready.send(Ok(Arc::new(|| {})));
        loop {
            match requests.recv() {
                Ok(Request::Watch(watch_point)) => watch_point.set_status(Status::Listening),
                Ok(Request::Unwatch(_, watch_point)) => {
                    watch_point.set_status(Status::NotListening);
                    watch_point.set_status(Status::Finished);
                }
                Ok(Request::Terminate) | Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::watch_point::WatchPoint;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::mpsc::sync_channel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn watch_then_unwatch_reaches_finished() {
        let (req_tx, req_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = sync_channel(1);
        let handle = thread::spawn(move || {
            NullBackend::run(Config::default(), Box::new(RecordingSink::new()), req_rx, ready_tx)
        });
        ready_rx.recv().unwrap().unwrap();

        let wp = Arc::new(WatchPoint::new(PathBuf::from("/tmp/w/r")));
        req_tx.send(Request::Watch(Arc::clone(&wp))).unwrap();
        assert_eq!(wp.await_listening_started(Duration::from_secs(1)), Status::Listening);

        req_tx
            .send(Request::Unwatch(PathBuf::from("/tmp/w/r"), Arc::clone(&wp)))
            .unwrap();
        let finished = wp.await_status(Duration::from_secs(1), |s| s == Status::Finished);
        assert_eq!(finished, Status::Finished);

        req_tx.send(Request::Terminate).unwrap();
        handle.join().unwrap();
    }
}
