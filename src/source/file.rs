//! Byte-stream datagram source
//!
//! Reads a length-prefixed stream from a file or pipe and re-splits it
//! into datagrams. The read buffer holds `max_read_size` bytes and grows
//! only when a single datagram is larger than the buffer; the carve step
//! knows the exact shortfall of an incomplete frame, so the next read
//! waits for precisely the missing bytes.

use crate::config::DgConfig;
use crate::error::{Error, Result};
use crate::fdio::FdGuard;
use crate::frame::{self, PREFIX_LEN};
use crate::ring::{BufferRing, MsgRef};
use crate::source::DatagramSource;
use crate::stats::SourceStats;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::os::unix::io::IntoRawFd;
use std::sync::Arc;
use std::time::Instant;

/// Datagram source reading a framed byte stream
pub struct FileSource {
    config: Arc<DgConfig>,
    fd: FdGuard,
    filename: String,
}

impl FileSource {
    /// Open a file path, `file://` URI, or `-`/`stdin` (which duplicates
    /// the process's standard input descriptor).
    pub fn new(config: Arc<DgConfig>, path: &str) -> Result<Self> {
        let (fd, filename) = if path == "-" || path == "stdin" {
            let fd = unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_DUPFD_CLOEXEC, 0) };
            if fd < 0 {
                return Err(Error::Syscall {
                    op: "fcntl",
                    source: io::Error::last_os_error(),
                });
            }
            (fd, "stdin".to_string())
        } else {
            let filename = path.strip_prefix("file://").unwrap_or(path).to_string();
            let file = File::open(&filename)
                .map_err(|e| Error::Endpoint(format!("failed to open {}: {}", filename, e)))?;
            (file.into_raw_fd(), filename)
        };
        log::debug!("stream source reading from {}", filename);

        Ok(FileSource {
            config,
            fd: FdGuard::new(fd),
            filename,
        })
    }

    fn read_loop(&self, ring: &BufferRing, stats: &Mutex<SourceStats>) -> Result<()> {
        let mut buf = vec![0u8; self.config.max_read_size];
        let mut n_read = 0usize;
        let mut n_min = PREFIX_LEN;
        let mut n_datagrams: u64 = 0;

        loop {
            if buf.len() < n_min {
                buf.resize(n_min, 0);
            }

            let fd = self.fd.fd();
            // SAFETY: the target range lies inside `buf`; fd is our
            // descriptor (or -1 after a planned close).
            let nb = unsafe {
                libc::read(
                    fd,
                    buf[n_read..].as_mut_ptr() as *mut libc::c_void,
                    buf.len() - n_read,
                )
            };
            if nb < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(code) if code == libc::EBADF => {
                        if self.fd.is_forced() {
                            log::debug!("read woke on closed descriptor with EOF forced");
                            break;
                        }
                        return Err(Error::Syscall {
                            op: "read",
                            source: err,
                        });
                    }
                    Some(code) if code == libc::EINTR => {
                        log::debug!("read interrupted by signal; continuing");
                        continue;
                    }
                    _ => {
                        return Err(Error::Syscall {
                            op: "read",
                            source: err,
                        });
                    }
                }
            }
            if nb == 0 {
                if n_read != 0 {
                    log::warn!(
                        "unexpected EOF on {} with partial datagram ({} bytes held)",
                        self.filename,
                        n_read
                    );
                }
                log::debug!("end of stream; shutting down");
                break;
            }
            n_read += nb as usize;
            if n_read < n_min {
                continue;
            }

            // Carve complete frames off the front of the buffer.
            let mut frames: Vec<(usize, usize)> = Vec::new();
            let mut next = 0usize;
            let mut shortfall = PREFIX_LEN;
            while next + PREFIX_LEN <= n_read {
                let mut prefix = [0u8; PREFIX_LEN];
                prefix.copy_from_slice(&buf[next..next + PREFIX_LEN]);
                let dg_len = frame::decode_prefix(prefix);
                if next + PREFIX_LEN + dg_len > n_read {
                    shortfall = PREFIX_LEN + dg_len;
                    break;
                }
                frames.push((next + PREFIX_LEN, dg_len));
                next += PREFIX_LEN + dg_len;
            }

            if frames.is_empty() {
                // A partial frame sits at the front; wait for the rest.
                n_min = shortfall;
                continue;
            }

            let now = Instant::now();
            if n_datagrams == 0 {
                log::debug!("first datagram read");
            }

            let batch: Vec<MsgRef<'_>> = frames
                .iter()
                .map(|&(off, len)| MsgRef::data(&buf[off..off + len]))
                .collect();
            ring.producer_commit_batch(&batch)?;
            drop(batch);
            let n_batch = frames.len() as u64;
            n_datagrams += n_batch;

            // Move any residual partial frame to the front.
            if next < n_read {
                buf.copy_within(next..n_read, 0);
                n_read -= next;
            } else {
                n_read = 0;
            }
            n_min = PREFIX_LEN;

            stats.lock().note_batch(n_batch, now);

            if self.config.max_datagrams != 0 && n_datagrams >= self.config.max_datagrams {
                log::debug!("copied {} datagrams; stopping at limit", n_datagrams);
                break;
            }
        }
        Ok(())
    }
}

impl DatagramSource for FileSource {
    fn copy_to_ring(&self, ring: &BufferRing, stats: &Mutex<SourceStats>) -> Result<()> {
        let result = self.read_loop(ring, stats);
        self.fd.close();
        result
    }

    fn force_eof(&self) {
        self.fd.force_eof();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::BufferRing;
    use crate::stats::RingStats;
    use std::io::Write;

    fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend_from_slice(&(p.len() as u32).to_be_bytes());
            out.extend_from_slice(p);
        }
        out
    }

    fn copy_file(content: &[u8], config: DgConfig) -> (Vec<u8>, Arc<Mutex<RingStats>>) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();

        let config = Arc::new(config);
        let ring_stats = Arc::new(Mutex::new(RingStats::default()));
        let ring = BufferRing::new(config.max_backlog, Arc::clone(&ring_stats));
        let stats = Mutex::new(SourceStats::default());

        let source =
            FileSource::new(Arc::clone(&config), tmp.path().to_str().unwrap()).unwrap();
        source.copy_to_ring(&ring, &stats).unwrap();
        ring.producer_set_eof();

        let mut out = Vec::new();
        loop {
            let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
            if batch.is_empty() {
                break;
            }
            let (a, b) = batch.slices();
            out.extend_from_slice(a);
            out.extend_from_slice(b);
            ring.consumer_commit_batch(batch.n).unwrap();
        }
        (out, ring_stats)
    }

    fn small_config() -> DgConfig {
        DgConfig {
            max_datagram_size: 4096,
            max_backlog: 1024 * 1024,
            max_read_size: 64,
            ..DgConfig::default()
        }
    }

    #[test]
    fn test_framed_stream_passes_through() {
        let content = framed(&[b"hello", b"", b"world", &[0x55; 200]]);
        let (out, stats) = copy_file(&content, small_config());
        assert_eq!(out, content);
        let s = stats.lock().clone();
        assert_eq!(s.n_datagrams, 4);
        assert_eq!(s.min_datagram_size, 0);
        assert_eq!(s.max_datagram_size, 200);
        assert_eq!(s.first_datagram_size, 5);
    }

    #[test]
    fn test_datagram_larger_than_read_buffer() {
        // 500-byte datagram against a 64-byte read buffer forces the
        // shortfall-driven growth path.
        let content = framed(&[&[0xAB; 500], b"tail"]);
        let (out, stats) = copy_file(&content, small_config());
        assert_eq!(out, content);
        assert_eq!(stats.lock().n_datagrams, 2);
    }

    #[test]
    fn test_truncated_final_record_is_dropped_cleanly() {
        let mut content = framed(&[b"one", b"two"]);
        // Prefix promises 5 payload bytes; provide only 3.
        content.extend_from_slice(&5u32.to_be_bytes());
        content.extend_from_slice(b"abc");

        let (out, stats) = copy_file(&content, small_config());
        assert_eq!(out, framed(&[b"one", b"two"]));
        assert_eq!(stats.lock().n_datagrams, 2);
    }

    #[test]
    fn test_max_datagrams_limit() {
        let content = framed(&[b"a", b"b", b"c", b"d"]);
        let config = DgConfig {
            max_datagrams: 2,
            // One frame per read so the limit lands between batches.
            max_read_size: 5,
            ..small_config()
        };
        let (out, _) = copy_file(&content, config);
        assert_eq!(out, framed(&[b"a", b"b"]));
    }

    #[test]
    fn test_missing_file_is_endpoint_error() {
        let config = Arc::new(small_config());
        let result = FileSource::new(config, "/nonexistent/setu-dgram-test");
        assert!(matches!(result, Err(Error::Endpoint(_))));
    }
}
