//! The wire event type delivered to the [`EventSink`](crate::sink::EventSink).
//!
//! Unlike the rich `EventKind` hierarchies common in this ecosystem, this
//! server's event model is deliberately a flat sum type with four shapes. A
//! visitor over it is sugar, not a requirement: callers are expected to
//! `match` directly.

use std::path::PathBuf;

use crate::error::ErrorKind;

/// The four shapes an [`Event`] can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A semantic change to a path under a watched root.
    Change {
        /// What kind of change occurred.
        kind: ChangeKind,
        /// The absolute path affected, in the host's path representation.
        path: PathBuf,
    },
    /// The OS ring buffer, or an intermediate user-space queue, dropped events.
    ///
    /// `scope` names the root under which the loss is known to have occurred,
    /// or is `None` if the loss cannot be attributed to a single root (for
    /// example Linux's `IN_Q_OVERFLOW`, which is instance-wide rather than
    /// per-watch).
    Overflow {
        /// The root the overflow is scoped to, if known.
        scope: Option<PathBuf>,
    },
    /// An OS-reported record the backend could not classify into a [`ChangeKind`].
    UnknownEvent {
        /// The path the OS attached to the record, if any.
        path: Option<PathBuf>,
    },
    /// A structured error surfaced by a backend.
    Failure {
        /// The classified kind of failure.
        kind: ErrorKind,
        /// A human-readable description, detail governed by the configured log level.
        message: String,
    },
}

impl Event {
    /// Construct a `Change` event.
    pub fn change(kind: ChangeKind, path: PathBuf) -> Self {
        Event::Change { kind, path }
    }

    /// Construct an `Overflow` event scoped to a root.
    pub fn overflow(scope: Option<PathBuf>) -> Self {
        Event::Overflow { scope }
    }

    /// Construct an `UnknownEvent`.
    pub fn unknown(path: Option<PathBuf>) -> Self {
        Event::UnknownEvent { path }
    }

    /// Construct a `Failure` event.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Event::Failure {
            kind,
            message: message.into(),
        }
    }

    /// The path this event pertains to, if it carries exactly one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Event::Change { path, .. } => Some(path),
            Event::UnknownEvent { path } => path.as_ref(),
            Event::Overflow { scope } => scope.as_ref(),
            Event::Failure { .. } => None,
        }
    }
}

/// The semantic classification of a `Change` event.
///
/// `INVALIDATED` is distinct from `REMOVED`: it denotes loss of the ability to
/// continue observing a subtree (root deleted, unmounted, or a macOS
/// history-dropped flag was seen), whereas `REMOVED` denotes an observed
/// deletion of a child entry while the root is still being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A new entry appeared.
    Created,
    /// An existing entry's content or metadata changed.
    Modified,
    /// An entry disappeared.
    Removed,
    /// The watched root itself can no longer be observed.
    Invalidated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_carries_its_path() {
        let event = Event::change(ChangeKind::Created, PathBuf::from("/tmp/w/r/a.txt"));
        assert_eq!(event.path(), Some(&PathBuf::from("/tmp/w/r/a.txt")));
    }

    #[test]
    fn overflow_event_scope_is_optional() {
        let scoped = Event::overflow(Some(PathBuf::from("/tmp/w/r")));
        let global = Event::overflow(None);
        assert_eq!(scoped.path(), Some(&PathBuf::from("/tmp/w/r")));
        assert_eq!(global.path(), None);
    }

    #[test]
    fn failure_event_has_no_path() {
        let event = Event::failure(ErrorKind::BackendFault, "ENOSPC");
        assert_eq!(event.path(), None);
    }
}
