//! The native-callable boundary surface described in the external
//! interfaces section of the design: a language-neutral ABI a host binding
//! can call across an FFI boundary, accepting UTF-16 path strings and
//! driving a [`Server`] underneath.
//!
//! This module is intentionally thin. It owns no policy of its own: it
//! decodes UTF-16, forwards to [`Server`], and translates [`Error`] into a
//! small C-compatible status code. The host-language binding layer itself
//! (JNI-style marshalling of strings and callback objects) is out of scope,
//! per the design's purpose statement; this is the contract that layer is
//! built on top of.

use std::ptr;
use std::slice;
use std::sync::Mutex;

use log::LevelFilter;

use crate::config::Config;
use crate::error::ErrorKind;
use crate::event::Event;
use crate::server::Server;
use crate::sink::EventSink;

/// Status codes returned across the ABI boundary in place of a `Result`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// The operation succeeded.
    Ok = 0,
    /// [`ErrorKind::InvalidPath`].
    InvalidPath = 1,
    /// [`ErrorKind::AlreadyWatching`].
    AlreadyWatching = 2,
    /// [`ErrorKind::NotWatching`].
    NotWatching = 3,
    /// [`ErrorKind::ResourceExhausted`].
    ResourceExhausted = 4,
    /// [`ErrorKind::PermissionDenied`].
    PermissionDenied = 5,
    /// [`ErrorKind::Closed`].
    Closed = 6,
    /// [`ErrorKind::BackendFault`] or any other unclassified failure.
    BackendFault = 7,
}

impl From<&ErrorKind> for StatusCode {
    fn from(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidPath => StatusCode::InvalidPath,
            ErrorKind::AlreadyWatching => StatusCode::AlreadyWatching,
            ErrorKind::NotWatching => StatusCode::NotWatching,
            ErrorKind::ResourceExhausted => StatusCode::ResourceExhausted,
            ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            ErrorKind::Closed => StatusCode::Closed,
            ErrorKind::BackendFault | ErrorKind::Io(_) | ErrorKind::Generic(_) => StatusCode::BackendFault,
        }
    }
}

/// An opaque handle returned by [`server_create`].
///
/// The underlying [`Server`] is not spawned until the first
/// [`server_start_watching`] call, so that `server_set_buffer_size`/
/// `server_set_log_level`/`server_set_latency` calls made in between still
/// reach the backend thread's initial [`Config`] rather than a config no one
/// reads again.
pub struct ServerHandle {
    state: Mutex<HandleState>,
}

struct HandleState {
    server: Option<Server>,
    sink: Option<CallbackSinkAdapter>,
    config: Config,
}

/// A host-provided callback invoked once per event, matching the shape of
/// the queue the design calls the Event Sink; the host owns the queue this
/// callback writes into, and the core never reads from it.
pub type CallbackSink = extern "C" fn(user_data: *mut std::ffi::c_void, event_tag: u32, path_ptr: *const u16, path_len: usize, message_ptr: *const u8, message_len: usize);

/// `user_data` is stored as a `usize` rather than the raw pointer so the
/// adapter stays auto-`Send`; the host guarantees the pointer it encodes
/// remains valid for as long as the handle returned by `server_create` is
/// alive, and this adapter never dereferences it, only forwards it back out.
///
/// `Copy` because both fields are, which lets `ensure_started` hand a copy to
/// a fallible `Server::start` without consuming the one stored on the handle
/// until that call actually succeeds.
#[derive(Clone, Copy)]
struct CallbackSinkAdapter {
    callback: CallbackSink,
    user_data: usize,
}

impl EventSink for CallbackSinkAdapter {
    fn push(&mut self, event: Event) -> Result<(), crate::sink::SinkClosed> {
        let user_data = self.user_data as *mut std::ffi::c_void;
        match event {
            Event::Change { kind, path } => {
                let tag = match kind {
                    crate::event::ChangeKind::Created => 0,
                    crate::event::ChangeKind::Modified => 1,
                    crate::event::ChangeKind::Removed => 2,
                    crate::event::ChangeKind::Invalidated => 3,
                };
                let wide: Vec<u16> = encode_utf16(&path);
                (self.callback)(user_data, tag, wide.as_ptr(), wide.len(), ptr::null(), 0);
            }
            Event::Overflow { scope } => {
                let wide = scope.map(|p| encode_utf16(&p)).unwrap_or_default();
                (self.callback)(user_data, 4, wide.as_ptr(), wide.len(), ptr::null(), 0);
            }
            Event::UnknownEvent { path } => {
                let wide = path.map(|p| encode_utf16(&p)).unwrap_or_default();
                (self.callback)(user_data, 5, wide.as_ptr(), wide.len(), ptr::null(), 0);
            }
            Event::Failure { kind, message } => {
                let status = StatusCode::from(&kind) as u32;
                (self.callback)(user_data, 0x8000_0000 | status, ptr::null(), 0, message.as_ptr(), message.len());
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn encode_utf16(path: &std::path::Path) -> Vec<u16> {
    path.to_string_lossy().encode_utf16().collect()
}

#[cfg(windows)]
fn encode_utf16(path: &std::path::Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str().encode_wide().collect()
}

/// Decode a UTF-16 path handed across the boundary.
///
/// # Safety
/// `ptr` must point to `len` valid `u16` code units.
unsafe fn decode_path(ptr: *const u16, len: usize) -> std::path::PathBuf {
    let slice = slice::from_raw_parts(ptr, len);
    let os_string = decode_wide(slice);
    std::path::PathBuf::from(os_string)
}

#[cfg(windows)]
fn decode_wide(units: &[u16]) -> std::ffi::OsString {
    use std::os::windows::ffi::OsStringExt;
    std::ffi::OsString::from_wide(units)
}

#[cfg(not(windows))]
fn decode_wide(units: &[u16]) -> std::ffi::OsString {
    std::ffi::OsString::from(String::from_utf16_lossy(units))
}

/// Start the backend thread on first use. A no-op if already started.
///
/// The pending sink is only cleared once `Server::start` actually succeeds —
/// it is `Copy`, so a failed attempt (thread spawn failure, backend init
/// error) leaves `state.sink` intact for the next `server_start_watching`
/// call to retry, rather than consuming it on a path that never produced a
/// `Server` and leaving nothing behind to retry with.
fn ensure_started(state: &mut HandleState) -> crate::error::Result<&mut Server> {
    if state.server.is_none() {
        let sink = state
            .sink
            .expect("a handle always holds a sink until the server starts");
        state.server = Some(Server::start(sink, state.config)?);
        state.sink = None;
    }
    Ok(state.server.as_mut().expect("just inserted"))
}

/// `server_create(callback_sink_handle) -> server_handle | error`.
///
/// The backend thread is not spawned yet; it starts lazily on the first
/// [`server_start_watching`] call, so that config set in between still
/// reaches it.
///
/// # Safety
/// `callback` must be a valid function pointer for the lifetime of the
/// returned handle; `user_data` is passed back to it unexamined.
#[no_mangle]
pub unsafe extern "C" fn server_create(
    callback: CallbackSink,
    user_data: *mut std::ffi::c_void,
    out_handle: *mut *mut ServerHandle,
) -> StatusCode {
    let sink = CallbackSinkAdapter {
        callback,
        user_data: user_data as usize,
    };
    let handle = Box::new(ServerHandle {
        state: Mutex::new(HandleState {
            server: None,
            sink: Some(sink),
            config: Config::default(),
        }),
    });
    *out_handle = Box::into_raw(handle);
    StatusCode::Ok
}

/// `server_start_watching(server_handle, utf16_path) -> void | error`.
///
/// # Safety
/// `handle` must be a live pointer returned by [`server_create`] and not yet
/// passed to [`server_close`]; `path_ptr`/`path_len` must describe a valid
/// UTF-16 buffer.
#[no_mangle]
pub unsafe extern "C" fn server_start_watching(handle: *mut ServerHandle, path_ptr: *const u16, path_len: usize) -> StatusCode {
    let handle = &*handle;
    let path = decode_path(path_ptr, path_len);
    let mut state = handle.state.lock().unwrap_or_else(|p| p.into_inner());
    let server = match ensure_started(&mut state) {
        Ok(server) => server,
        Err(err) => return StatusCode::from(&err.kind),
    };
    match server.start_watching(&path) {
        Ok(()) => StatusCode::Ok,
        Err(err) => StatusCode::from(&err.kind),
    }
}

/// `server_stop_watching(server_handle, utf16_path) -> void | error`.
///
/// # Safety
/// Same preconditions as [`server_start_watching`].
#[no_mangle]
pub unsafe extern "C" fn server_stop_watching(handle: *mut ServerHandle, path_ptr: *const u16, path_len: usize) -> StatusCode {
    let handle = &*handle;
    let path = decode_path(path_ptr, path_len);
    let state = handle.state.lock().unwrap_or_else(|p| p.into_inner());
    match state.server.as_ref() {
        Some(server) => match server.stop_watching(&path) {
            Ok(()) => StatusCode::Ok,
            Err(err) => StatusCode::from(&err.kind),
        },
        // Nothing has ever been armed, so nothing can be watching `path`.
        None => StatusCode::NotWatching,
    }
}

/// `server_close(server_handle) -> void`.
///
/// # Safety
/// `handle` must be a live pointer returned by [`server_create`], not
/// previously passed to this function. The handle is freed; the pointer must
/// not be used again afterwards.
#[no_mangle]
pub unsafe extern "C" fn server_close(handle: *mut ServerHandle) {
    let handle = Box::from_raw(handle);
    let mut state = handle.state.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(server) = state.server.as_mut() {
        server.close();
    }
}

/// `server_set_log_level(level)` — adjusts internal diagnostic verbosity;
/// affects only `Failure` message detail, per the design. Takes effect
/// immediately if the server has not started yet, otherwise applies to the
/// next root armed.
///
/// # Safety
/// `handle` must be a live pointer returned by [`server_create`].
#[no_mangle]
pub unsafe extern "C" fn server_set_log_level(handle: *mut ServerHandle, level: u8) {
    let handle = &*handle;
    let filter = match level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut state = handle.state.lock().unwrap_or_else(|p| p.into_inner());
    state.config = state.config.with_log_level(filter);
}

/// Windows-only: `server_set_buffer_size(bytes)`, clamped to `[4 KiB, 64 MiB]`.
/// Must be called before the first call to [`server_start_watching`] to take
/// effect.
///
/// # Safety
/// `handle` must be a live pointer returned by [`server_create`].
#[no_mangle]
#[cfg(target_os = "windows")]
pub unsafe extern "C" fn server_set_buffer_size(handle: *mut ServerHandle, bytes: u32) {
    let handle = &*handle;
    let mut state = handle.state.lock().unwrap_or_else(|p| p.into_inner());
    state.config = state.config.with_buffer_size(bytes);
}

/// macOS-only: `server_set_latency(microseconds)`. Must be called before the
/// first call to [`server_start_watching`] to take effect.
///
/// # Safety
/// `handle` must be a live pointer returned by [`server_create`].
#[no_mangle]
#[cfg(target_os = "macos")]
pub unsafe extern "C" fn server_set_latency(handle: *mut ServerHandle, microseconds: u64) {
    let handle = &*handle;
    let mut state = handle.state.lock().unwrap_or_else(|p| p.into_inner());
    state.config = state.config.with_latency(std::time::Duration::from_micros(microseconds));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_maps_every_error_kind() {
        assert_eq!(StatusCode::from(&ErrorKind::InvalidPath), StatusCode::InvalidPath);
        assert_eq!(StatusCode::from(&ErrorKind::Closed), StatusCode::Closed);
        assert_eq!(StatusCode::from(&ErrorKind::Generic("x".into())), StatusCode::BackendFault);
    }

    #[test]
    fn decode_path_round_trips_ascii() {
        let wide: Vec<u16> = "/tmp/w/r".encode_utf16().collect();
        let decoded = unsafe { decode_path(wide.as_ptr(), wide.len()) };
        assert_eq!(decoded, std::path::PathBuf::from("/tmp/w/r"));
    }
}
