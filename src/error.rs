//! Error and result types returned by the server's control-plane operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Alias for results returned by this crate's public operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error that occurred.
///
/// This enumeration is intentionally small: backends classify whatever raw OS
/// error they hit into one of these buckets before it ever reaches a caller or
/// an [`Event::Failure`](crate::event::Event::Failure).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The path cannot be canonicalised, or does not refer to a directory.
    InvalidPath,
    /// `startWatching` was called for a root that is already in the map.
    AlreadyWatching,
    /// `stopWatching` (or a runtime operation) named a root the server does not know.
    NotWatching,
    /// The OS refused the subscription: descriptor limit, too many watches, no memory for a buffer.
    ResourceExhausted,
    /// The OS denied access to the path.
    PermissionDenied,
    /// The operation was attempted after `close()` completed.
    Closed,
    /// An established subscription hit an unexpected OS error code.
    BackendFault,
    /// An I/O error that hasn't been classified into one of the above yet.
    Io(io::ErrorKind),
    /// A generic, platform-specific error message with no narrower classification.
    Generic(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidPath => write!(f, "invalid path"),
            ErrorKind::AlreadyWatching => write!(f, "already watching this path"),
            ErrorKind::NotWatching => write!(f, "not watching this path"),
            ErrorKind::ResourceExhausted => write!(f, "OS resource exhausted"),
            ErrorKind::PermissionDenied => write!(f, "permission denied"),
            ErrorKind::Closed => write!(f, "server is closed"),
            ErrorKind::BackendFault => write!(f, "backend fault"),
            ErrorKind::Io(kind) => write!(f, "I/O error: {kind:?}"),
            ErrorKind::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

/// An error produced by a control-plane operation or surfaced in a `Failure` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// The classified kind of error.
    pub kind: ErrorKind,
    /// An optional human-readable message, filled in with more or less detail
    /// depending on the log level set via `server_set_log_level`.
    pub message: Option<String>,
    /// Paths associated with the error, most specific first.
    pub paths: Vec<PathBuf>,
}

impl Error {
    /// Construct a new error of the given kind with no message or paths.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            paths: Vec::new(),
        }
    }

    /// Wrap a raw I/O error without further classification.
    pub fn io(err: io::Error) -> Self {
        Self::new(ErrorKind::Io(err.kind())).with_message(err.to_string())
    }

    /// Wrap a raw I/O error encountered while arming or re-arming a watch.
    pub fn io_watch(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::new(ErrorKind::InvalidPath),
            io::ErrorKind::PermissionDenied => Self::new(ErrorKind::PermissionDenied),
            _ => Self::io(err),
        }
        .with_message(err.to_string())
    }

    /// A generic error with a plain message and no further classification.
    pub fn generic(message: &str) -> Self {
        Self::new(ErrorKind::Generic(message.to_owned()))
    }

    /// Shorthand for [`ErrorKind::InvalidPath`].
    pub fn invalid_path() -> Self {
        Self::new(ErrorKind::InvalidPath)
    }

    /// Shorthand for [`ErrorKind::AlreadyWatching`].
    pub fn already_watching() -> Self {
        Self::new(ErrorKind::AlreadyWatching)
    }

    /// Shorthand for [`ErrorKind::NotWatching`].
    pub fn not_watching() -> Self {
        Self::new(ErrorKind::NotWatching)
    }

    /// Shorthand for [`ErrorKind::Closed`].
    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed)
    }

    /// Shorthand for [`ErrorKind::BackendFault`] built from a message.
    pub fn backend_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendFault).with_message(message)
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a path, most-specific-first.
    pub fn add_path(mut self, path: PathBuf) -> Self {
        self.paths.push(path);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        for path in &self.paths {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_message_and_paths() {
        let err = Error::invalid_path()
            .with_message("no such directory")
            .add_path(PathBuf::from("/tmp/w/r"));
        let rendered = err.to_string();
        assert!(rendered.contains("invalid path"));
        assert!(rendered.contains("no such directory"));
        assert!(rendered.contains("/tmp/w/r"));
    }

    #[test]
    fn io_watch_classifies_not_found_as_invalid_path() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = Error::io_watch(io_err);
        assert_eq!(err.kind, ErrorKind::InvalidPath);
    }

    #[test]
    fn io_watch_classifies_permission_denied() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = Error::io_watch(io_err);
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn generic_error_round_trips_message() {
        let err = Error::generic("boom");
        assert_eq!(err.kind, ErrorKind::Generic("boom".into()));
    }
}
