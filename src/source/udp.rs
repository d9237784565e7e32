//! UDP datagram source
//!
//! Receives datagrams in batches with `recvmmsg(MSG_WAITFORONE)`: the call
//! returns as soon as at least one datagram is available, with up to one
//! datagram per preallocated receive slot in the same call. The socket
//! receive timeout is switched between `start_timeout` (no datagram seen
//! yet) and `eof_timeout`; expiry is a normal end of stream, not an error.

use crate::config::DgConfig;
use crate::error::{Error, Result};
use crate::fdio::FdGuard;
use crate::resolve;
use crate::ring::{BufferRing, MsgKind, MsgRef};
use crate::source::DatagramSource;
use crate::stats::SourceStats;
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::IntoRawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Instant;

/// Datagram source bound to a UDP socket
pub struct UdpSource {
    config: Arc<DgConfig>,
    fd: FdGuard,
    local_addr: SocketAddr,
    /// Receive slots, one `max_datagram_size` buffer per slot
    slots: Mutex<Vec<Vec<u8>>>,
}

impl UdpSource {
    /// Bind to `udp://[bind-addr:]port`, trying resolved candidates in
    /// order. A bare port binds `0.0.0.0`.
    pub fn new(config: Arc<DgConfig>, path: &str) -> Result<Self> {
        let endpoint = resolve::parse_udp_source(path)?;
        let addrs = resolve::resolve(&endpoint, path)?;
        let socket = resolve::bind_first(&addrs, path)?;
        let local_addr = socket.local_addr().map_err(|e| Error::Syscall {
            op: "getsockname",
            source: e,
        })?;
        log::debug!("UDP source bound to {}", local_addr);

        let slot_count = config.slot_count();
        let slots = (0..slot_count)
            .map(|_| vec![0u8; config.max_datagram_size])
            .collect();

        Ok(UdpSource {
            config,
            fd: FdGuard::new(socket.into_raw_fd()),
            local_addr,
            slots: Mutex::new(slots),
        })
    }

    /// The bound address, with the kernel-assigned port when bound to
    /// port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn receive_loop(&self, ring: &BufferRing, stats: &Mutex<SourceStats>) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot_count = slots.len();

        // Scatter descriptors: one single-segment iovec per slot, fixed
        // for the lifetime of the loop.
        let mut iovs: Vec<libc::iovec> = slots
            .iter_mut()
            .map(|buf| libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            })
            .collect();
        // SAFETY: mmsghdr is a C struct for which all-zeros is a valid
        // initial state.
        let mut msgs: Vec<libc::mmsghdr> = vec![unsafe { mem::zeroed() }; slot_count];
        for (i, msg) in msgs.iter_mut().enumerate() {
            // SAFETY: i < iovs.len(); the iovec vector outlives the loop.
            msg.msg_hdr.msg_iov = unsafe { iovs.as_mut_ptr().add(i) };
            msg.msg_hdr.msg_iovlen = 1;
        }

        let mut n_datagrams: u64 = 0;
        let mut current_timeout: Option<f64> = None;

        loop {
            let timeout = if n_datagrams == 0 {
                self.config.start_timeout
            } else {
                self.config.eof_timeout
            };
            let fd = self.fd.fd();
            if current_timeout != Some(timeout) {
                set_recv_timeout(fd, timeout);
                current_timeout = Some(timeout);
            }

            // SAFETY: fd is our socket (or -1 after a planned close, which
            // fails with EBADF); msgs/iovs point into the slot buffers,
            // which outlive the call.
            let n = unsafe {
                libc::recvmmsg(
                    fd,
                    msgs.as_mut_ptr(),
                    slot_count as libc::c_uint,
                    libc::MSG_WAITFORONE,
                    ptr::null_mut(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                        log::debug!("timeout waiting for datagram; generating EOF");
                        break;
                    }
                    Some(code) if code == libc::EBADF || code == libc::ENOTSOCK => {
                        if self.fd.is_forced() {
                            log::debug!("recvmmsg woke on closed socket with EOF forced");
                            break;
                        }
                        return Err(Error::Syscall {
                            op: "recvmmsg",
                            source: err,
                        });
                    }
                    Some(code) if code == libc::EINTR => {
                        log::debug!("recvmmsg interrupted by signal; continuing");
                        continue;
                    }
                    _ => {
                        return Err(Error::Syscall {
                            op: "recvmmsg",
                            source: err,
                        });
                    }
                }
            }
            if n == 0 {
                log::debug!("timeout waiting for datagram; shutting down");
                break;
            }

            let n = n as usize;
            let now = Instant::now();
            if n_datagrams == 0 {
                log::debug!("first datagram received");
            }
            if n > 1 && n == slot_count {
                log::warn!(
                    "recvmmsg batch full ({} datagrams), possible packet loss",
                    n
                );
            }

            let batch: Vec<MsgRef<'_>> = msgs[..n]
                .iter()
                .enumerate()
                .map(|(i, msg)| {
                    let len = (msg.msg_len as usize).min(slots[i].len());
                    let flags = msg.msg_hdr.msg_flags;
                    let kind = if flags & (libc::MSG_OOB | libc::MSG_ERRQUEUE) != 0 {
                        MsgKind::Ancillary
                    } else if flags & libc::MSG_TRUNC != 0 {
                        MsgKind::Truncated
                    } else {
                        MsgKind::Data
                    };
                    MsgRef {
                        payload: &slots[i][..len],
                        kind,
                    }
                })
                .collect();
            ring.producer_commit_batch(&batch)?;
            drop(batch);
            n_datagrams += n as u64;

            stats.lock().note_batch(n as u64, now);

            if self.config.max_datagrams != 0 && n_datagrams >= self.config.max_datagrams {
                log::debug!("copied {} datagrams; stopping at limit", n_datagrams);
                break;
            }
        }
        Ok(())
    }
}

impl DatagramSource for UdpSource {
    fn copy_to_ring(&self, ring: &BufferRing, stats: &Mutex<SourceStats>) -> Result<()> {
        let result = self.receive_loop(ring, stats);
        self.fd.close();
        result
    }

    fn force_eof(&self) {
        self.fd.force_eof();
    }
}

/// Apply `SO_RCVTIMEO`. A timeout of zero or less puts the socket in plain
/// blocking mode with no timeout.
fn set_recv_timeout(fd: libc::c_int, timeout_secs: f64) {
    let tv = if timeout_secs > 0.0 {
        libc::timeval {
            tv_sec: timeout_secs as libc::time_t,
            tv_usec: ((timeout_secs.fract()) * 1e6) as libc::suseconds_t,
        }
    } else {
        libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        }
    };
    // SAFETY: tv is a valid timeval; a failure (for example on an already
    // closed fd) is observed by the next receive call instead.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        log::debug!(
            "setsockopt(SO_RCVTIMEO) failed: {}",
            io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let config = Arc::new(DgConfig {
            max_iovecs: 8,
            max_datagram_size: 2048,
            max_backlog: 65536,
            ..DgConfig::default()
        });
        let source = UdpSource::new(config, "udp://127.0.0.1:0").unwrap();
        assert_ne!(source.local_addr().port(), 0);
    }

    #[test]
    fn test_unresolvable_host_reports_endpoint_error() {
        let config = Arc::new(DgConfig::default());
        // ".invalid." is reserved and never resolves; resolvers that
        // somehow answer still leave nothing bindable.
        if let Err(e) = UdpSource::new(Arc::clone(&config), "udp://nonexistent.invalid.:9") {
            assert!(matches!(e, Error::Endpoint(_)));
        }
    }

    #[test]
    fn test_force_eof_is_idempotent() {
        let config = Arc::new(DgConfig {
            max_iovecs: 4,
            max_datagram_size: 1024,
            max_backlog: 65536,
            ..DgConfig::default()
        });
        let source = UdpSource::new(config, "udp://127.0.0.1:0").unwrap();
        source.force_eof();
        source.force_eof();
    }
}
