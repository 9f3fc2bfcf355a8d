//! Windows backend: `ReadDirectoryChangesW` with overlapped I/O and a
//! completion routine, pumped by an alertable wait on the backend thread.
//!
//! Control-plane wake-ups use `QueueUserAPC` targeting the backend thread —
//! the APC itself carries no payload, it only interrupts `SleepEx` so the
//! thread re-checks the shared [`Request`] channel, exactly as completion
//! routines interrupt it to deliver a finished read.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, ERROR_OPERATION_ABORTED, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_ACTION_ADDED, FILE_ACTION_MODIFIED,
    FILE_ACTION_REMOVED, FILE_ACTION_RENAMED_NEW_NAME, FILE_ACTION_RENAMED_OLD_NAME,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY,
    FILE_NOTIFY_CHANGE_ATTRIBUTES, FILE_NOTIFY_CHANGE_DIR_NAME, FILE_NOTIFY_CHANGE_FILE_NAME,
    FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SIZE, FILE_NOTIFY_INFORMATION,
    FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::{CancelIoEx, OVERLAPPED};
use windows_sys::Win32::System::Threading::{
    GetCurrentThreadId, OpenThread, QueueUserAPC, SleepEx, INFINITE, THREAD_SET_CONTEXT,
};

use super::{push_or_log, Backend, ReadySignal, Request};
use crate::config::Config;
use crate::error::Error;
use crate::event::{ChangeKind, Event};
use crate::sink::EventSink;
use crate::watch_point::{Status, WatchPoint};

const NOTIFY_MASK: u32 = FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME
    | FILE_NOTIFY_CHANGE_ATTRIBUTES
    | FILE_NOTIFY_CHANGE_SIZE
    | FILE_NOTIFY_CHANGE_LAST_WRITE;

fn wide(path: &Path) -> Vec<u16> {
    OsStr::new(path).encode_wide().chain(Some(0)).collect()
}

/// Per-root state the completion routine needs; boxed and leaked into
/// `OVERLAPPED::hEvent` for the lifetime of one outstanding read, exactly as
/// this ecosystem's Windows backend stashes its read-request pointer there
/// (the field is otherwise unused for directory-change notifications).
struct ReadContext {
    dir_handle: HANDLE,
    root: PathBuf,
    buffer: Vec<u8>,
    overlapped: OVERLAPPED,
    watch_point: Arc<WatchPoint>,
    pump: *mut Pump,
}

/// The Windows backend.
#[derive(Debug)]
pub struct WindowsBackend;

impl Backend for WindowsBackend {
    fn run(config: Config, sink: Box<dyn EventSink>, requests: Receiver<Request>, ready: ReadySignal) {
        // SAFETY: `GetCurrentThreadId` + `OpenThread` with `THREAD_SET_CONTEXT`
        // gives a duplicable handle other threads can target with
        // `QueueUserAPC`; the pseudo-handle from `GetCurrentThread` cannot be
        // used cross-thread.
        let thread_id = unsafe { GetCurrentThreadId() };
        let thread_handle = unsafe { OpenThread(THREAD_SET_CONTEXT, 0, thread_id) };
        if thread_handle == 0 {
            let _ = ready.send(Err(Error::generic("failed to open backend thread handle for APC delivery")));
            return;
        }

        let wake_fn: super::WakeFn = Arc::new(move || unsafe {
            QueueUserAPC(Some(empty_apc), thread_handle, 0);
        });

        let mut pump = Pump {
            sink,
            config,
            roots: HashMap::new(),
            running: true,
        };

        let _ = ready.send(Ok(wake_fn));
        pump.run(&requests);

        unsafe {
            CloseHandle(thread_handle);
        }
    }
}

unsafe extern "system" fn empty_apc(_param: usize) {}

struct RootState {
    dir_handle: HANDLE,
    watch_point: Arc<WatchPoint>,
}

struct Pump {
    sink: Box<dyn EventSink>,
    config: Config,
    roots: HashMap<PathBuf, RootState>,
    running: bool,
}

impl Pump {
    fn run(&mut self, requests: &Receiver<Request>) {
        while self.running {
            // SleepEx returns WAIT_IO_COMPLETION when an APC (our wake-up or
            // a completion routine) ran during the wait; either way we fall
            // through and drain the request channel.
            unsafe {
                SleepEx(INFINITE, 1);
            }
            while let Ok(request) = requests.try_recv() {
                match request {
                    Request::Watch(watch_point) => self.watch(watch_point),
                    Request::Unwatch(path, watch_point) => self.unwatch(&path, &watch_point),
                    Request::Terminate => {
                        self.running = false;
                        break;
                    }
                }
            }
        }
        self.terminate();
    }

    fn watch(&mut self, watch_point: Arc<WatchPoint>) {
        let root = watch_point.root().clone();
        let wide_path = wide(&root);

        let dir_handle = unsafe {
            CreateFileW(
                wide_path.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                0,
            )
        };
        if dir_handle == -1 {
            let code = unsafe { GetLastError() };
            log::warn!("failed to open {} for watching (error {code})", root.display());
            watch_point.set_status(Status::FailedToListen);
            return;
        }

        self.roots.insert(
            root.clone(),
            RootState {
                dir_handle,
                watch_point: Arc::clone(&watch_point),
            },
        );

        if self.issue_read(root.clone(), dir_handle, Arc::clone(&watch_point)) {
            watch_point.set_status(Status::Listening);
        } else {
            watch_point.set_status(Status::FailedToListen);
            self.roots.remove(&root);
            unsafe {
                CloseHandle(dir_handle);
            }
        }
    }

    fn issue_read(&mut self, root: PathBuf, dir_handle: HANDLE, watch_point: Arc<WatchPoint>) -> bool {
        let buffer = vec![0u8; self.config.buffer_size() as usize];
        let context = Box::new(ReadContext {
            dir_handle,
            root,
            buffer,
            overlapped: unsafe { std::mem::zeroed() },
            watch_point,
            pump: self as *mut Pump,
        });
        let context_ptr = Box::into_raw(context);

        // SAFETY: `context_ptr` is leaked; `completion_routine` reclaims
        // ownership via `Box::from_raw` exactly once per completion, and a
        // failed `ReadDirectoryChangesW` call below reclaims it immediately.
        let ok = unsafe {
            let context = &mut *context_ptr;
            context.overlapped.hEvent = context_ptr as isize;
            let buffer_ptr = context.buffer.as_mut_ptr();
            let buffer_len = context.buffer.len() as u32;
            ReadDirectoryChangesW(
                dir_handle,
                buffer_ptr as *mut _,
                buffer_len,
                1, // watch subtree: recursive, one native subscription per root
                NOTIFY_MASK,
                ptr::null_mut(),
                &mut context.overlapped,
                Some(completion_routine),
            ) != 0
        };

        if !ok {
            unsafe {
                drop(Box::from_raw(context_ptr));
            }
        }
        ok
    }

    fn unwatch(&mut self, root: &Path, watch_point: &Arc<WatchPoint>) {
        watch_point.set_status(Status::NotListening);
        if let Some(state) = self.roots.get(root) {
            unsafe {
                CancelIoEx(state.dir_handle, ptr::null());
            }
        }
        // The outstanding read's completion routine finishes the transition
        // to `Finished` and closes the handle once `ERROR_OPERATION_ABORTED`
        // is observed; see `completion_routine`.
        let _ = watch_point;
    }

    fn terminate(&mut self) {
        let roots: Vec<_> = self.roots.keys().cloned().collect();
        for root in roots {
            if let Some(state) = self.roots.get(&root) {
                unsafe {
                    CancelIoEx(state.dir_handle, ptr::null());
                }
            }
        }
        // Drain completion routines for the cancellations just issued.
        unsafe {
            SleepEx(50, 1);
        }
    }

    /// Push through the sink; on a closed sink, stop the pump so `run()`
    /// tears every outstanding root down via `terminate()` instead of
    /// re-issuing reads nobody can receive the results of.
    fn emit(&mut self, event: Event) -> bool {
        if push_or_log(self.sink.as_mut(), event) {
            true
        } else {
            self.running = false;
            false
        }
    }
}

unsafe extern "system" fn completion_routine(error_code: u32, _bytes_transferred: u32, overlapped: *mut OVERLAPPED) {
    let context_ptr = (*overlapped).hEvent as *mut ReadContext;
    let context = Box::from_raw(context_ptr);
    let ReadContext {
        dir_handle,
        root,
        buffer,
        watch_point,
        pump,
        ..
    } = *context;

    let pump = &mut *pump;

    if error_code == ERROR_OPERATION_ABORTED {
        pump.roots.remove(&root);
        watch_point.set_status(Status::Finished);
        CloseHandle(dir_handle);
        return;
    }

    if error_code != 0 {
        pump.emit(Event::failure(
            crate::error::ErrorKind::BackendFault,
            format!("ReadDirectoryChangesW error {error_code}"),
        ));
        pump.roots.remove(&root);
        watch_point.set_status(Status::Finished);
        CloseHandle(dir_handle);
        return;
    }

    let sink_open = if _bytes_transferred == 0 {
        pump.emit(Event::overflow(Some(root.clone())))
    } else {
        emit_records(pump, &root, &buffer)
    };
    if !sink_open {
        watch_point.set_status(Status::Finished);
        CloseHandle(dir_handle);
        pump.roots.remove(&root);
        return;
    }

    // Re-issue the read immediately, matching the reference backend's "get
    // the next request queued up as soon as possible" ordering.
    if !pump.issue_read(root.clone(), dir_handle, Arc::clone(&watch_point)) {
        watch_point.set_status(Status::Finished);
        CloseHandle(dir_handle);
        pump.roots.remove(&root);
    }
}

/// Translate every `FILE_NOTIFY_INFORMATION` record in `buffer` and push it
/// through `pump`'s sink. Returns `false` as soon as the sink closes, so the
/// caller can tear this root down instead of continuing to decode records
/// nobody can receive.
fn emit_records(pump: &mut Pump, root: &Path, buffer: &[u8]) -> bool {
    let mut offset = 0usize;
    loop {
        if offset + std::mem::size_of::<FILE_NOTIFY_INFORMATION>() > buffer.len() {
            break;
        }
        // SAFETY: Windows does not guarantee `FILE_NOTIFY_INFORMATION`
        // records are aligned within the buffer; read unaligned exactly as
        // this ecosystem's Windows backend does.
        let record: FILE_NOTIFY_INFORMATION =
            unsafe { ptr::read_unaligned(buffer[offset..].as_ptr() as *const FILE_NOTIFY_INFORMATION) };

        let name_len = record.FileNameLength as usize;
        let name_offset = offset + std::mem::size_of::<u32>() * 3;
        let name_bytes = &buffer[name_offset..name_offset + name_len];
        let name_u16: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect();
        let name = String::from_utf16_lossy(&name_u16);
        let path = root.join(name);

        let kind = match record.Action {
            FILE_ACTION_ADDED | FILE_ACTION_RENAMED_NEW_NAME => Some(ChangeKind::Created),
            FILE_ACTION_REMOVED | FILE_ACTION_RENAMED_OLD_NAME => Some(ChangeKind::Removed),
            FILE_ACTION_MODIFIED => Some(ChangeKind::Modified),
            _ => None,
        };
        let delivered = match kind {
            Some(kind) => pump.emit(Event::change(kind, path)),
            None => pump.emit(Event::unknown(Some(path))),
        };
        if !delivered {
            return false;
        }

        if record.NextEntryOffset == 0 {
            break;
        }
        offset += record.NextEntryOffset as usize;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_mask_includes_name_and_attribute_changes() {
        assert_eq!(NOTIFY_MASK & FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_FILE_NAME);
        assert_eq!(NOTIFY_MASK & FILE_NOTIFY_CHANGE_ATTRIBUTES, FILE_NOTIFY_CHANGE_ATTRIBUTES);
    }
}
