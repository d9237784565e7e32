//! Engine configuration
//!
//! All knobs arrive from the command line and are frozen into a [`DgConfig`]
//! before the copier starts. Validation happens once, up front, so worker
//! threads never re-check parameters.

use crate::error::{Error, Result};
use crate::frame::PREFIX_LEN;

/// Default per-datagram buffer size; 65535 is the maximum allowed by UDP
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65_535;
/// Default backlog capacity between source and destination (2 GiB)
pub const DEFAULT_MAX_BACKLOG: usize = 2 * 1024 * 1024 * 1024;
/// Default maximum number of bytes to read in one system call
pub const DEFAULT_MAX_READ_SIZE: usize = 256 * 1024;
/// Default maximum number of bytes to write in one system call
pub const DEFAULT_MAX_WRITE_SIZE: usize = 256 * 1024;

/// Fallback receive-slot count when `sysconf(_SC_IOV_MAX)` is unavailable
const FALLBACK_IOV_MAX: usize = 1024;

/// Immutable configuration for a datagram copy
#[derive(Debug, Clone)]
pub struct DgConfig {
    /// Max datagram size in bytes, not including the length prefix
    pub max_datagram_size: usize,

    /// Max number of unwritten bytes to buffer, including length prefixes.
    /// Must be at least `max_datagram_size + 4`.
    pub max_backlog: usize,

    /// Seconds with no datagrams on a UDP source before an EOF is inferred.
    /// `<= 0` means no timeout (copying runs until a signal or forced EOF).
    pub eof_timeout: f64,

    /// Seconds to wait for the first datagram on a UDP source.
    /// `< 0` means use `eof_timeout` (see [`DgConfig::normalized`]);
    /// `0` waits forever.
    pub start_timeout: f64,

    /// For UDP destinations, max datagrams per second to send.
    /// `<= 0` means unlimited.
    pub max_datagram_rate: f64,

    /// Stop after copying this many datagrams. `0` means unlimited.
    pub max_datagrams: u64,

    /// Max number of bytes to read in one system call (stream sources)
    pub max_read_size: usize,

    /// Max number of bytes to write in one system call (stream destinations)
    pub max_write_size: usize,

    /// Number of receive slots for batched UDP receive.
    /// `0` means the platform `IOV_MAX`; larger values are clamped to it.
    pub max_iovecs: usize,

    /// For file destinations, append instead of truncating
    pub append: bool,

    /// Install the SIGINT/SIGUSR1 handling thread
    pub handle_signals: bool,
}

impl Default for DgConfig {
    fn default() -> Self {
        DgConfig {
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            max_backlog: DEFAULT_MAX_BACKLOG,
            eof_timeout: 0.0,
            start_timeout: -1.0,
            max_datagram_rate: -1.0,
            max_datagrams: 0,
            max_read_size: DEFAULT_MAX_READ_SIZE,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            max_iovecs: 0,
            append: false,
            handle_signals: true,
        }
    }
}

impl DgConfig {
    /// Resolve derived defaults: a negative `start_timeout` inherits
    /// `eof_timeout`.
    pub fn normalized(mut self) -> Self {
        if self.start_timeout < 0.0 {
            self.start_timeout = self.eof_timeout;
        }
        self
    }

    /// Check parameter consistency once, before the engine starts.
    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_size == 0 {
            return Err(Error::Config("max_datagram_size must be positive".to_string()));
        }
        if self.max_backlog < self.max_datagram_size + PREFIX_LEN {
            return Err(Error::Config(format!(
                "max_backlog must be at least max_datagram_size + {} (got {} < {} + {})",
                PREFIX_LEN, self.max_backlog, self.max_datagram_size, PREFIX_LEN
            )));
        }
        if self.max_read_size < PREFIX_LEN {
            return Err(Error::Config(format!(
                "max_read_size must be at least {} bytes",
                PREFIX_LEN
            )));
        }
        if self.max_write_size == 0 {
            return Err(Error::Config("max_write_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Number of receive slots to preallocate for batched UDP receive:
    /// `min(max_iovecs, IOV_MAX)`, with `0` meaning the platform maximum.
    pub fn slot_count(&self) -> usize {
        let platform = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
        let platform = if platform > 0 {
            platform as usize
        } else {
            FALLBACK_IOV_MAX
        };
        if self.max_iovecs == 0 {
            platform
        } else {
            self.max_iovecs.min(platform)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DgConfig::default().normalized().validate().is_ok());
    }

    #[test]
    fn test_backlog_must_hold_one_datagram() {
        let config = DgConfig {
            max_datagram_size: 1000,
            max_backlog: 1003,
            ..DgConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = DgConfig {
            max_datagram_size: 1000,
            max_backlog: 1004,
            ..DgConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_start_timeout_inherits_eof_timeout() {
        let config = DgConfig {
            eof_timeout: 2.5,
            start_timeout: -1.0,
            ..DgConfig::default()
        }
        .normalized();
        assert_eq!(config.start_timeout, 2.5);

        let config = DgConfig {
            eof_timeout: 2.5,
            start_timeout: 7.0,
            ..DgConfig::default()
        }
        .normalized();
        assert_eq!(config.start_timeout, 7.0);
    }

    #[test]
    fn test_slot_count_clamps_to_platform() {
        let unlimited = DgConfig {
            max_iovecs: 0,
            ..DgConfig::default()
        };
        let platform = unlimited.slot_count();
        assert!(platform > 0);

        let small = DgConfig {
            max_iovecs: 4,
            ..DgConfig::default()
        };
        assert_eq!(small.slot_count(), 4);

        let huge = DgConfig {
            max_iovecs: usize::MAX,
            ..DgConfig::default()
        };
        assert_eq!(huge.slot_count(), platform);
    }
}
