//! Linux backend: one inotify instance per server, multiplexed with an
//! eventfd-backed wake-up via `mio`, polled on a dedicated thread.
//!
//! Recursive registration is eager: arming a root walks its subtree and adds
//! one inotify watch per directory found, growing and shrinking that set as
//! `IN_CREATE`/`IN_DELETE`-class events are observed. `IN_MOVED_FROM` and
//! `IN_MOVED_TO` cookies are deliberately NOT correlated into a rename pair —
//! each is translated and emitted independently, because this server's wire
//! format (`ChangeKind::Removed` / `ChangeKind::Created`) has no slot for a
//! correlated from/to pair the way richer event hierarchies in this
//! ecosystem do.

use std::collections::HashMap;
use std::fs::metadata;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use walkdir::WalkDir;

use super::{push_or_log, Backend, ReadySignal, Request};
use crate::config::Config;
use crate::error::Error;
use crate::event::{ChangeKind, Event};
use crate::sink::EventSink;
use crate::watch_point::{Status, WatchPoint};

const INOTIFY_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

const BASE_MASK: WatchMask = WatchMask::from_bits_truncate(
    WatchMask::CREATE.bits()
        | WatchMask::DELETE.bits()
        | WatchMask::DELETE_SELF.bits()
        | WatchMask::MODIFY.bits()
        | WatchMask::ATTRIB.bits()
        | WatchMask::CLOSE_WRITE.bits()
        | WatchMask::MOVED_FROM.bits()
        | WatchMask::MOVED_TO.bits()
        | WatchMask::MOVE_SELF.bits(),
);

struct RootEntry {
    watch_point: Arc<WatchPoint>,
    /// Every descriptor, root included, that belongs to this root's subtree.
    descriptors: Vec<WatchDescriptor>,
}

struct DirEntry {
    path: PathBuf,
    root: PathBuf,
    is_root: bool,
}

/// The Linux backend.
#[derive(Debug)]
pub struct InotifyBackend;

impl Backend for InotifyBackend {
    fn run(config: Config, sink: Box<dyn EventSink>, requests: Receiver<Request>, ready: ReadySignal) {
        let mut inotify = match Inotify::init() {
            Ok(inotify) => inotify,
            Err(err) => {
                let _ = ready.send(Err(Error::io(err)));
                return;
            }
        };

        let poll = match Poll::new() {
            Ok(poll) => poll,
            Err(err) => {
                let _ = ready.send(Err(Error::io(err)));
                return;
            }
        };
        let waker = match Waker::new(poll.registry(), WAKE_TOKEN) {
            Ok(waker) => Arc::new(waker),
            Err(err) => {
                let _ = ready.send(Err(Error::io(err)));
                return;
            }
        };

        if let Err(err) = poll
            .registry()
            .register(&mut SourceFd(&inotify.as_raw_fd()), INOTIFY_TOKEN, Interest::READABLE)
        {
            let _ = ready.send(Err(Error::io(err)));
            return;
        }

        let wake_handle = Arc::clone(&waker);
        let wake_fn: super::WakeFn = Arc::new(move || {
            if let Err(err) = wake_handle.wake() {
                log::error!("failed to wake inotify backend thread: {err}");
            }
        });

        let mut pump = Pump {
            poll,
            inotify,
            sink,
            config,
            roots: HashMap::new(),
            dirs: HashMap::new(),
            running: true,
        };

        let _ = ready.send(Ok(wake_fn));
        pump.run(&requests);
    }
}

struct Pump {
    poll: Poll,
    inotify: Inotify,
    sink: Box<dyn EventSink>,
    config: Config,
    roots: HashMap<PathBuf, RootEntry>,
    dirs: HashMap<WatchDescriptor, DirEntry>,
    running: bool,
}

impl Pump {
    fn run(&mut self, requests: &Receiver<Request>) {
        let mut events = Events::with_capacity(1024);
        while self.running {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("inotify poll failed: {err}");
                break;
            }
            for event in events.iter() {
                match event.token() {
                    WAKE_TOKEN => self.drain_requests(requests),
                    INOTIFY_TOKEN => self.drain_inotify(),
                    _ => {}
                }
            }
        }
        self.terminate();
    }

    fn drain_requests(&mut self, requests: &Receiver<Request>) {
        while let Ok(request) = requests.try_recv() {
            match request {
                Request::Watch(watch_point) => self.watch(watch_point),
                Request::Unwatch(path, watch_point) => self.unwatch(&path, &watch_point),
                Request::Terminate => {
                    self.running = false;
                    return;
                }
            }
        }
    }

    fn watch(&mut self, watch_point: Arc<WatchPoint>) {
        let root = watch_point.root().clone();
        if self.roots.contains_key(&root) {
            // The server itself rejects duplicate roots before posting a
            // request; a duplicate arriving here is an internal invariant
            // violation, not a normal `AlreadyWatching` path.
            watch_point.set_status(Status::FailedToListen);
            return;
        }

        let mut descriptors = Vec::new();
        let mut failed = None;
        for entry in WalkDir::new(&root)
            .follow_links(self.config.follow_symlinks())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
        {
            let path = entry.path().to_path_buf();
            match self.add_single_watch(&path) {
                Ok(wd) => {
                    let is_root = path == root;
                    self.dirs.insert(
                        wd.clone(),
                        DirEntry {
                            path: path.clone(),
                            root: root.clone(),
                            is_root,
                        },
                    );
                    descriptors.push(wd);
                }
                Err(err) => {
                    if path == root {
                        failed = Some(err);
                        break;
                    }
                    // A subdirectory vanished between the walk and the watch
                    // call (TOCTOU); tolerate it, the root itself is fine.
                    log::debug!("skipping vanished subdirectory {}: {err}", path.display());
                }
            }
        }

        if let Some(err) = failed {
            log::warn!("failed to arm watch point for {}: {err}", root.display());
            watch_point.set_status(Status::FailedToListen);
            return;
        }

        self.roots.insert(
            root,
            RootEntry {
                watch_point: Arc::clone(&watch_point),
                descriptors,
            },
        );
        watch_point.set_status(Status::Listening);
    }

    /// Push through the sink; on a closed sink, stop the pump so `run()`
    /// tears every watch point down via `terminate()` instead of continuing
    /// to translate inotify records nobody can receive.
    fn emit(&mut self, event: Event) -> bool {
        if push_or_log(self.sink.as_mut(), event) {
            true
        } else {
            self.running = false;
            false
        }
    }

    fn add_single_watch(&mut self, path: &Path) -> Result<WatchDescriptor, Error> {
        self.inotify
            .watches()
            .add(path, BASE_MASK)
            .map_err(|err| Error::io_watch(err).add_path(path.to_path_buf()))
    }

    fn unwatch(&mut self, path: &Path, watch_point: &Arc<WatchPoint>) {
        watch_point.set_status(Status::NotListening);
        if let Some(entry) = self.roots.remove(path) {
            for wd in &entry.descriptors {
                self.dirs.remove(wd);
                let _ = self.inotify.watches().remove(wd.clone());
            }
        }
        watch_point.set_status(Status::Finished);
    }

    fn terminate(&mut self) {
        let roots: Vec<_> = self.roots.drain().collect();
        for (_, entry) in roots {
            for wd in entry.descriptors {
                let _ = self.inotify.watches().remove(wd);
            }
            entry.watch_point.set_status(Status::NotListening);
            entry.watch_point.set_status(Status::Finished);
        }
    }

    fn drain_inotify(&mut self) {
        let mut buffer = [0u8; 4096];
        loop {
            let events = match self.inotify.read_events(&mut buffer) {
                Ok(events) => events,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.emit(Event::failure(crate::error::ErrorKind::BackendFault, err.to_string()));
                    break;
                }
            };

            let mut newly_created_dirs = Vec::new();
            let mut ignored = Vec::new();

            for raw in events {
                if raw.mask.contains(EventMask::Q_OVERFLOW) {
                    if !self.emit(Event::overflow(None)) {
                        return;
                    }
                    continue;
                }

                let Some(dir) = self.dirs.get(&raw.wd) else {
                    if !self.emit(Event::unknown(None)) {
                        return;
                    }
                    continue;
                };
                let root = dir.root.clone();
                let dir_path = dir.path.clone();
                let is_root = dir.is_root;

                let name_path = raw.name.map(|name| dir_path.join(name));

                if raw.mask.contains(EventMask::CREATE) || raw.mask.contains(EventMask::MOVED_TO) {
                    if let Some(path) = &name_path {
                        if !self.emit(Event::change(ChangeKind::Created, path.clone())) {
                            return;
                        }
                        if raw.mask.contains(EventMask::ISDIR) {
                            newly_created_dirs.push((root.clone(), path.clone()));
                        }
                    }
                } else if raw.mask.contains(EventMask::DELETE) || raw.mask.contains(EventMask::MOVED_FROM) {
                    if let Some(path) = &name_path {
                        if !self.emit(Event::change(ChangeKind::Removed, path.clone())) {
                            return;
                        }
                    }
                } else if raw.mask.intersects(EventMask::MODIFY | EventMask::ATTRIB | EventMask::CLOSE_WRITE) {
                    if let Some(path) = &name_path {
                        if !self.emit(Event::change(ChangeKind::Modified, path.clone())) {
                            return;
                        }
                    }
                } else if raw.mask.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF | EventMask::UNMOUNT) {
                    if is_root && !self.emit(Event::change(ChangeKind::Invalidated, root.clone())) {
                        return;
                    }
                }

                if raw.mask.contains(EventMask::IGNORED) {
                    ignored.push(raw.wd.clone());
                }
            }

            for wd in ignored {
                self.retire_descriptor(wd);
            }
            for (root, path) in newly_created_dirs {
                self.add_descendant_watch(&root, &path);
            }
        }
    }

    /// A directory was created under an already-recursively-watched root;
    /// add a watch for it so its own children are observed too.
    fn add_descendant_watch(&mut self, root: &Path, path: &Path) {
        if metadata(path).map(|m| m.is_dir()).unwrap_or(false) {
            if let Ok(wd) = self.add_single_watch(path) {
                self.dirs.insert(
                    wd.clone(),
                    DirEntry {
                        path: path.to_path_buf(),
                        root: root.to_path_buf(),
                        is_root: false,
                    },
                );
                if let Some(entry) = self.roots.get_mut(root) {
                    entry.descriptors.push(wd);
                }
            }
        }
    }

    /// `IN_IGNORED` tells us the kernel already dropped this descriptor; if
    /// it was a root, the whole watch point finishes. If a bare subdirectory,
    /// just forget our bookkeeping — no `inotify_rm_watch` call is needed or
    /// valid for an already-removed descriptor.
    fn retire_descriptor(&mut self, wd: WatchDescriptor) {
        let Some(dir) = self.dirs.remove(&wd) else {
            return;
        };
        if dir.is_root {
            if let Some(entry) = self.roots.remove(&dir.root) {
                for other in entry.descriptors {
                    self.dirs.remove(&other);
                }
                entry.watch_point.set_status(Status::NotListening);
                entry.watch_point.set_status(Status::Finished);
            }
        } else if let Some(entry) = self.roots.get_mut(&dir.root) {
            entry.descriptors.retain(|d| *d != wd);
        }
    }
}

