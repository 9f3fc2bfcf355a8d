//! macOS backend: a single `FSEventStream` carrying every watched root, run
//! on a dedicated `CFRunLoop`.
//!
//! FSEvents has no incremental "add one more root" API: whenever the root
//! set changes the stream is stopped, invalidated, released, and recreated
//! with the full new root set, picking up from the last delivered event ID
//! so no events are skipped in the gap. Control-plane wake-ups are
//! implemented as a short, bounded `CFRunLoopRunInMode` poll rather than the
//! reference implementation's `CFRunLoopPerformBlock`/`CFRunLoopWakeUp` pair
//! (which relies on Objective-C blocks); see `DESIGN.md` for the rationale.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use objc2_core_foundation::{CFArray, CFRetained, CFRunLoop, CFString};
use objc2_core_services::{
    kFSEventStreamCreateFlagFileEvents, kFSEventStreamCreateFlagNoDefer,
    kFSEventStreamEventFlagItemChangeOwner, kFSEventStreamEventFlagItemCreated,
    kFSEventStreamEventFlagItemFinderInfoMod, kFSEventStreamEventFlagItemInodeMetaMod,
    kFSEventStreamEventFlagItemModified, kFSEventStreamEventFlagItemRemoved,
    kFSEventStreamEventFlagItemRenamed, kFSEventStreamEventFlagItemXattrMod,
    kFSEventStreamEventFlagMustScanSubDirs, kFSEventStreamEventFlagRootChanged,
    kFSEventStreamEventIdSinceNow, FSEventStreamContext, FSEventStreamCreate,
    FSEventStreamEventId, FSEventStreamInvalidate, FSEventStreamRef,
    FSEventStreamScheduleWithRunLoop, FSEventStreamStart, FSEventStreamStop,
};

use super::{push_or_log, Backend, ReadySignal, Request};
use crate::config::Config;
use crate::error::Error;
use crate::event::{ChangeKind, Event};
use crate::sink::EventSink;
use crate::watch_point::{Status, WatchPoint};

/// How long each `CFRunLoopRunInMode` slice runs before returning to check
/// the request channel. Short enough that `stopWatching`/`close` feel
/// immediate, long enough not to busy-loop.
const POLL_SLICE: std::time::Duration = Duration::from_millis(50);

struct RootState {
    watch_point: Arc<WatchPoint>,
}

/// The macOS backend.
#[derive(Debug)]
pub struct FsEventBackend;

impl Backend for FsEventBackend {
    fn run(config: Config, sink: Box<dyn EventSink>, requests: Receiver<Request>, ready: ReadySignal) {
        // The wake primitive is a no-op: the run loop is never blocked
        // longer than `POLL_SLICE`, so posting a request just has to wait
        // for the current slice to end.
        let _ = ready.send(Ok(Arc::new(|| {})));

        let mut pump = Pump {
            sink,
            config,
            roots: HashMap::new(),
            stream: None,
            last_event_id: unsafe { kFSEventStreamEventIdSinceNow },
            running: true,
        };
        pump.run(&requests);
    }
}

struct Pump {
    sink: Box<dyn EventSink>,
    config: Config,
    roots: HashMap<PathBuf, RootState>,
    stream: Option<FSEventStreamRef>,
    last_event_id: FSEventStreamEventId,
    running: bool,
}

impl Pump {
    fn run(&mut self, requests: &Receiver<Request>) {
        while self.running {
            match requests.recv_timeout(POLL_SLICE) {
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(request) = requests.try_recv() {
                self.handle(request);
            }
            if self.stream.is_some() {
                unsafe {
                    objc2_core_foundation::CFRunLoopRunInMode(
                        objc2_core_foundation::kCFRunLoopDefaultMode,
                        POLL_SLICE.as_secs_f64(),
                        false,
                    );
                }
            }
        }
        self.terminate();
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Watch(watch_point) => self.add_root(watch_point),
            Request::Unwatch(path, watch_point) => self.remove_root(&path, &watch_point),
            Request::Terminate => self.running = false,
        }
    }

    fn add_root(&mut self, watch_point: Arc<WatchPoint>) {
        let root = watch_point.root().clone();
        self.roots.insert(root, RootState { watch_point: Arc::clone(&watch_point) });
        if self.recreate_stream() {
            watch_point.set_status(Status::Listening);
        } else {
            self.roots.remove(watch_point.root());
            watch_point.set_status(Status::FailedToListen);
        }
    }

    fn remove_root(&mut self, root: &Path, watch_point: &Arc<WatchPoint>) {
        watch_point.set_status(Status::NotListening);
        self.roots.remove(root);
        if !self.roots.is_empty() {
            self.recreate_stream();
        } else {
            self.stop_stream();
        }
        watch_point.set_status(Status::Finished);
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            unsafe {
                FSEventStreamStop(stream);
                FSEventStreamInvalidate(stream);
            }
        }
    }

    /// Stop, invalidate, and recreate the stream with the full current root
    /// set, because FSEvents offers no incremental root-edit API. Preserves
    /// `last_event_id` across the gap so no events are skipped.
    fn recreate_stream(&mut self) -> bool {
        self.stop_stream();
        if self.roots.is_empty() {
            return true;
        }

        let cf_paths: Vec<CFRetained<CFString>> = self
            .roots
            .keys()
            .map(|p| CFString::from_str(&p.to_string_lossy()))
            .collect();
        let cf_array = CFArray::from_retained_objects(&cf_paths);

        let mut context = FSEventStreamContext {
            version: 0,
            info: self as *mut Pump as *mut c_void,
            retain: None,
            release: None,
            copyDescription: None,
        };

        let stream = unsafe {
            FSEventStreamCreate(
                std::ptr::null_mut(),
                Some(callback),
                &mut context,
                &*cf_array as *const _ as *mut _,
                self.last_event_id,
                self.config.latency().as_secs_f64(),
                kFSEventStreamCreateFlagFileEvents | kFSEventStreamCreateFlagNoDefer,
            )
        };
        if stream.is_null() {
            log::error!("FSEventStreamCreate failed");
            return false;
        }

        let Some(run_loop) = CFRunLoop::current() else {
            log::error!("no current CFRunLoop on the backend thread");
            unsafe {
                FSEventStreamInvalidate(stream);
            }
            return false;
        };
        unsafe {
            FSEventStreamScheduleWithRunLoop(stream, &run_loop, objc2_core_foundation::kCFRunLoopDefaultMode);
            if FSEventStreamStart(stream) == 0 {
                FSEventStreamInvalidate(stream);
                return false;
            }
        }
        self.stream = Some(stream);
        true
    }

    fn terminate(&mut self) {
        self.stop_stream();
        let roots: Vec<_> = self.roots.drain().collect();
        for (_, state) in roots {
            state.watch_point.set_status(Status::NotListening);
            state.watch_point.set_status(Status::Finished);
        }
    }

    /// Push through the sink; on a closed sink, stop the poll loop so
    /// `run()` calls `terminate()` instead of continuing to translate
    /// `FSEventStream` callbacks nobody can receive.
    fn emit(&mut self, event: Event) -> bool {
        if push_or_log(self.sink.as_mut(), event) {
            true
        } else {
            self.running = false;
            false
        }
    }
}

unsafe extern "C-unwind" fn callback(
    _stream: FSEventStreamRef,
    info: *mut c_void,
    num_events: usize,
    event_paths: *mut c_void,
    event_flags: *const u32,
    event_ids: *const FSEventStreamEventId,
) {
    let pump = &mut *(info as *mut Pump);
    let paths = event_paths as *const *const std::os::raw::c_char;

    for i in 0..num_events {
        let flag = *event_flags.add(i);
        let id = *event_ids.add(i);
        pump.last_event_id = id;

        let c_str = std::ffi::CStr::from_ptr(*paths.add(i));
        let path = PathBuf::from(c_str.to_string_lossy().into_owned());

        if flag & kFSEventStreamEventFlagMustScanSubDirs != 0 {
            if !pump.emit(Event::overflow(Some(path.clone()))) {
                return;
            }
            continue;
        }
        if flag & kFSEventStreamEventFlagRootChanged != 0 {
            if !pump.emit(Event::change(ChangeKind::Invalidated, path.clone())) {
                return;
            }
            continue;
        }
        if flag & kFSEventStreamEventFlagItemCreated != 0 && !pump.emit(Event::change(ChangeKind::Created, path.clone())) {
            return;
        }
        if flag & kFSEventStreamEventFlagItemRemoved != 0 && !pump.emit(Event::change(ChangeKind::Removed, path.clone())) {
            return;
        }
        // Renames are emitted as `Modified` unconditionally rather than
        // inspecting existence at callback time, which would race with
        // further file-system activity. See DESIGN.md.
        if flag & kFSEventStreamEventFlagItemRenamed != 0 && !pump.emit(Event::change(ChangeKind::Modified, path.clone())) {
            return;
        }
        // Each metadata-only flag is translated independently, matching this
        // ecosystem's own fsevent flag translation: a single callback record
        // can carry several of these alongside `ItemModified`, and each one
        // is reported rather than collapsed into a single event.
        if flag & kFSEventStreamEventFlagItemModified != 0 && !pump.emit(Event::change(ChangeKind::Modified, path.clone())) {
            return;
        }
        if flag & kFSEventStreamEventFlagItemInodeMetaMod != 0 && !pump.emit(Event::change(ChangeKind::Modified, path.clone())) {
            return;
        }
        if flag & kFSEventStreamEventFlagItemFinderInfoMod != 0 && !pump.emit(Event::change(ChangeKind::Modified, path.clone())) {
            return;
        }
        if flag & kFSEventStreamEventFlagItemChangeOwner != 0 && !pump.emit(Event::change(ChangeKind::Modified, path.clone())) {
            return;
        }
        if flag & kFSEventStreamEventFlagItemXattrMod != 0 && !pump.emit(Event::change(ChangeKind::Modified, path)) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_slice_is_bounded() {
        assert!(POLL_SLICE <= Duration::from_millis(200));
    }
}
