//! Server-wide configuration.

use log::LevelFilter;
use std::time::Duration;

/// Minimum accepted Windows buffer size: 4 KiB.
pub const MIN_BUFFER_SIZE: u32 = 4 * 1024;
/// Maximum accepted Windows buffer size: 64 MiB, per the external ABI's clamp.
pub const MAX_BUFFER_SIZE: u32 = 64 * 1024 * 1024;
/// The buffer size used when a backend's first root is armed without an explicit call
/// to `server_set_buffer_size`.
pub const DEFAULT_BUFFER_SIZE: u32 = 16 * 1024;

/// The latency used when a backend's first root is armed without an explicit call
/// to `server_set_latency`: immediate delivery.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(0);

/// Server-wide configuration.
///
/// Some settings are platform-specific (`buffer_size` only matters to the
/// Windows backend, `latency` only to the macOS backend) but the struct is
/// shared so that `server_set_buffer_size`/`server_set_latency` can be called
/// before the first root is armed regardless of which platform the binary
/// targets, mirroring how this ecosystem's watcher crates keep a single
/// `Config` even though individual fields apply to a subset of backends.
///
/// ```rust
/// use notify_server::Config;
///
/// let config = Config::default().with_follow_symlinks(false);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    buffer_size: u32,
    latency: Duration,
    follow_symlinks: bool,
    log_level: LevelFilter,
}

impl Config {
    /// Set the Windows per-directory event buffer size, in bytes.
    ///
    /// Clamped to `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]`, per `server_set_buffer_size`.
    /// Has no effect outside the Windows backend. Must be set before the first
    /// root is armed; changes afterwards apply only to subsequently armed roots.
    pub fn with_buffer_size(mut self, bytes: u32) -> Self {
        self.buffer_size = bytes.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    /// Returns the current buffer size setting.
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Set the FSEventStream latency.
    ///
    /// Has no effect outside the macOS backend. Must be set before `start()`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the current latency setting.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Determine if symbolic links should be followed during the Linux
    /// backend's recursive subtree walk on `arm()`. On by default.
    pub fn with_follow_symlinks(mut self, follow_symlinks: bool) -> Self {
        self.follow_symlinks = follow_symlinks;
        self
    }

    /// Returns the current follow-symlinks setting.
    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Set the internal diagnostic verbosity, per `server_set_log_level`.
    ///
    /// This affects only how much detail is interpolated into `Failure`
    /// messages; it does not install or configure any logger.
    pub fn with_log_level(mut self, log_level: LevelFilter) -> Self {
        self.log_level = log_level;
        self
    }

    /// Returns the current log level setting.
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            latency: DEFAULT_LATENCY,
            follow_symlinks: true,
            log_level: LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_clamps_below_minimum() {
        let config = Config::default().with_buffer_size(1024);
        assert_eq!(config.buffer_size(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn buffer_size_clamps_above_maximum() {
        let config = Config::default().with_buffer_size(u32::MAX);
        assert_eq!(config.buffer_size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn buffer_size_within_range_is_unchanged() {
        let config = Config::default().with_buffer_size(32 * 1024);
        assert_eq!(config.buffer_size(), 32 * 1024);
    }

    #[test]
    fn default_follows_symlinks() {
        assert!(Config::default().follow_symlinks());
    }

    #[test]
    fn default_latency_is_zero() {
        assert_eq!(Config::default().latency(), Duration::from_millis(0));
    }
}
