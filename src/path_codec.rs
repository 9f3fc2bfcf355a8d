//! Conversion between the host's path representation and the OS-native form.
//!
//! This is the only place in the crate that deals with the representation
//! mismatch between the boundary ABI (UTF-16 on Windows, UTF-8 elsewhere) and
//! the host-convention [`PathBuf`] used everywhere internally. Backends never
//! construct event paths from scratch; they always go through
//! [`join_relative`].

use std::path::{Component, Path, PathBuf};

use crate::error::Error;

/// The Windows long-path escape prefix.
const WINDOWS_LONG_PATH_PREFIX: &str = r"\\?\";

/// The legacy `MAX_PATH` limit that triggers the long-path escape on Windows.
const WINDOWS_LEGACY_PATH_LIMIT: usize = 260;

/// Normalise a host-supplied root path: resolve it to an absolute path,
/// strip trailing separators (except a bare root marker), and, on Windows,
/// prefix the long-path escape when required.
///
/// Case is never folded: case-sensitivity is a file-system property, not a
/// string one, and the codec must not silently change which files a path
/// refers to.
pub fn normalize_root(path: &Path) -> Result<PathBuf, Error> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(Error::io)?
            .join(path)
    };

    let canonical = dunce_lexical(&absolute);

    if cfg!(target_os = "windows") {
        Ok(apply_long_path_prefix(&canonical))
    } else {
        Ok(canonical)
    }
}

/// Lexically collapse `.`/`..` components without touching the file system,
/// preserving a trailing root marker (e.g. `/` or `C:\`) rather than stripping
/// it down to nothing.
fn dunce_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(Component::RootDir.as_os_str())
    } else {
        out
    }
}

/// Add the `\\?\` escape when the path exceeds the legacy `MAX_PATH` limit or
/// already carries a drive-relative form that benefits from it. Idempotent:
/// a path that already carries the prefix is returned unchanged.
fn apply_long_path_prefix(path: &Path) -> PathBuf {
    let as_str = path.to_string_lossy();
    if as_str.starts_with(WINDOWS_LONG_PATH_PREFIX) {
        return path.to_path_buf();
    }
    if as_str.len() >= WINDOWS_LEGACY_PATH_LIMIT {
        let mut prefixed = PathBuf::from(WINDOWS_LONG_PATH_PREFIX);
        prefixed.push(path);
        prefixed
    } else {
        path.to_path_buf()
    }
}

/// Join a watched root with an OS-reported relative sub-path, producing the
/// absolute path carried on an emitted [`Event`](crate::event::Event).
///
/// `relative` is whatever the backend decoded from the raw OS record (a
/// `FILE_NOTIFY_INFORMATION` file name on Windows, an inotify `name` field on
/// Linux, or a path fragment below an FSEvents root on macOS); this function
/// does not re-derive it.
pub fn join_relative(root: &Path, relative: &Path) -> PathBuf {
    root.join(relative)
}

/// macOS-only: accept and re-emit paths in NFD form, as Apple's file system
/// APIs do, rather than normalising to NFC. This is intentionally a no-op
/// pass-through placeholder on non-macOS targets' shared code paths — actual
/// NFD (de)composition happens at the point paths cross the FSEvents FFI
/// boundary, where the platform APIs already hand back NFD `CFString`s.
pub fn preserve_macos_form(path: &Path) -> PathBuf {
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_root_resolves_relative_paths() {
        let cwd = std::env::current_dir().unwrap();
        let normalized = normalize_root(Path::new(".")).unwrap();
        assert_eq!(normalized, dunce_lexical(&cwd));
    }

    #[test]
    fn normalize_root_is_idempotent_on_absolute_paths() {
        let path = std::env::temp_dir();
        let once = normalize_root(&path).unwrap();
        let twice = normalize_root(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn dunce_lexical_collapses_parent_and_current_dir_components() {
        let collapsed = dunce_lexical(Path::new("/a/b/../c/./d"));
        assert_eq!(collapsed, PathBuf::from("/a/c/d"));
    }

    #[test]
    fn join_relative_concatenates_with_platform_separator() {
        let joined = join_relative(Path::new("/tmp/w/r"), Path::new("a.txt"));
        assert_eq!(joined, PathBuf::from("/tmp/w/r/a.txt"));
    }

    #[test]
    fn long_path_prefix_only_applied_once() {
        let long_component = "a".repeat(300);
        let path = PathBuf::from(format!("/{long_component}"));
        let prefixed = apply_long_path_prefix(&path);
        let prefixed_twice = apply_long_path_prefix(&prefixed);
        assert_eq!(prefixed, prefixed_twice);
    }
}
