//! Byte-stream datagram destination
//!
//! Drains the ring in batches bounded by `max_write_size`, issuing one
//! `writev` when a batch wraps the ring and a plain `write` otherwise. No
//! re-framing happens here: the length prefixes encoded by the source pass
//! through transparently, so boundaries survive the stream format. A short
//! write is retried until the batch is fully on its way.

use crate::config::DgConfig;
use crate::dest::DatagramDestination;
use crate::error::{Error, Result};
use crate::fdio::FdGuard;
use crate::ring::BufferRing;
use crate::stats::DestinationStats;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::sync::Arc;

/// Datagram destination writing a framed byte stream
pub struct FileDestination {
    config: Arc<DgConfig>,
    fd: FdGuard,
    filename: String,
}

impl FileDestination {
    /// Open a file path, `file://` URI, or `-`/`stdout` (which duplicates
    /// the process's standard output descriptor). Existing files are
    /// truncated unless `append` is configured.
    pub fn new(config: Arc<DgConfig>, path: &str) -> Result<Self> {
        let (fd, filename) = if path == "-" || path == "stdout" {
            let fd = unsafe { libc::fcntl(libc::STDOUT_FILENO, libc::F_DUPFD_CLOEXEC, 0) };
            if fd < 0 {
                return Err(Error::Syscall {
                    op: "fcntl",
                    source: io::Error::last_os_error(),
                });
            }
            (fd, "stdout".to_string())
        } else {
            let filename = path.strip_prefix("file://").unwrap_or(path).to_string();
            let mut options = OpenOptions::new();
            options.write(true).create(true);
            if config.append {
                options.append(true);
            } else {
                options.truncate(true);
            }
            let file = options
                .open(&filename)
                .map_err(|e| Error::Endpoint(format!("failed to open {}: {}", filename, e)))?;
            (file.into_raw_fd(), filename)
        };
        log::debug!("stream destination writing to {}", filename);

        Ok(FileDestination {
            config,
            fd: FdGuard::new(fd),
            filename,
        })
    }

    fn drain_loop(&self, ring: &BufferRing, stats: &Mutex<DestinationStats>) -> Result<()> {
        let fd = self.fd.fd();
        loop {
            let batch = ring.consumer_start_batch(1, self.config.max_write_size)?;
            if batch.is_empty() {
                if ring.is_eof() {
                    break;
                }
                continue;
            }

            let (a, b) = batch.slices();
            write_segments(fd, a, b)?;
            ring.consumer_commit_batch(batch.n)?;

            stats.lock().n_bytes_sent += batch.n as u64;
        }

        // Flush to stable storage; pipes and character devices reject
        // fsync, which is fine.
        // SAFETY: fd is our descriptor.
        unsafe {
            libc::fsync(fd);
        }
        log::debug!("drained ring to {}", self.filename);
        Ok(())
    }
}

impl DatagramDestination for FileDestination {
    fn copy_from_ring(&self, ring: &BufferRing, stats: &Mutex<DestinationStats>) -> Result<()> {
        let result = self.drain_loop(ring, stats);
        self.fd.close();
        result
    }
}

/// Write one or two contiguous regions, retrying on short writes and
/// EINTR until everything is consumed.
fn write_segments<'a>(fd: RawFd, mut a: &'a [u8], mut b: &'a [u8]) -> Result<()> {
    while !a.is_empty() || !b.is_empty() {
        if a.is_empty() {
            a = b;
            b = &[];
        }
        let (op, ret) = if b.is_empty() {
            // SAFETY: `a` is a live slice.
            let ret =
                unsafe { libc::write(fd, a.as_ptr() as *const libc::c_void, a.len()) };
            ("write", ret)
        } else {
            let iovs = [
                libc::iovec {
                    iov_base: a.as_ptr() as *mut libc::c_void,
                    iov_len: a.len(),
                },
                libc::iovec {
                    iov_base: b.as_ptr() as *mut libc::c_void,
                    iov_len: b.len(),
                },
            ];
            // SAFETY: both iovecs describe live slices.
            let ret = unsafe { libc::writev(fd, iovs.as_ptr(), 2) };
            ("writev", ret)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Syscall { op, source: err });
        }
        // Advance past whatever the kernel accepted.
        let mut written = ret as usize;
        let take_a = written.min(a.len());
        a = &a[take_a..];
        written -= take_a;
        b = &b[written.min(b.len())..];
    }
    Ok(())
}
