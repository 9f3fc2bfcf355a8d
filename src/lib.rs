//! A cross-platform file-system change notification engine.
//!
//! Unifies Windows `ReadDirectoryChangesW`, Linux `inotify`, and macOS
//! `FSEventStream` behind a single blocking control-plane contract: a
//! [`Server`] owns a map of watched roots to [`watch_point::WatchPoint`]s,
//! drives exactly one backend thread per instance, and delivers everything it
//! observes as a flat [`Event`] onto a host-owned [`EventSink`].
//!
//! ```no_run
//! use notify_server::{Config, Event, Server};
//!
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let mut server = Server::start(tx, Config::default())?;
//! server.start_watching(std::path::Path::new("."))?;
//!
//! for event in rx {
//!     match event {
//!         Event::Change { kind, path } => println!("{kind:?}: {}", path.display()),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # Ok::<(), notify_server::Error>(())
//! ```
//!
//! The crate is organised around the components the design names: [`sink`]
//! (Event Sink), [`path_codec`] (Path Codec), [`watch_point`] (Watch Point),
//! `backend` (Backend, one implementation per platform), and [`server`]
//! (Server). [`abi`] exposes the same contract as a flat `extern "C"`
//! surface for non-Rust hosts.

mod abi;
mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod path_codec;
pub mod server;
pub mod sink;
pub mod watch_point;

pub use abi::{server_close, server_create, server_set_log_level, server_start_watching, server_stop_watching, CallbackSink, ServerHandle, StatusCode};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use event::{ChangeKind, Event};
pub use server::Server;
pub use sink::{EventSink, RecordingSink, SinkClosed};

#[cfg(target_os = "windows")]
pub use abi::server_set_buffer_size;
#[cfg(target_os = "macos")]
pub use abi::server_set_latency;
