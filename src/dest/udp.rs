//! UDP datagram destination
//!
//! Re-splits the framed stream on its length prefixes and sends one
//! datagram per `sendmsg` call. When a datagram rate cap is configured the
//! sender sleeps until the next slot of a monotonic schedule; the schedule
//! advances by a fixed interval per send with no catch-up, so the long-run
//! average holds the configured rate.

use crate::config::DgConfig;
use crate::dest::DatagramDestination;
use crate::error::{Error, Result};
use crate::fdio::FdGuard;
use crate::frame::{self, PREFIX_LEN};
use crate::resolve;
use crate::ring::BufferRing;
use crate::stats::DestinationStats;
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::os::unix::io::IntoRawFd;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Datagram destination connected to a UDP peer
pub struct UdpDestination {
    config: Arc<DgConfig>,
    fd: FdGuard,
}

impl UdpDestination {
    /// Resolve `udp://host:port` and connect the first usable candidate.
    pub fn new(config: Arc<DgConfig>, path: &str) -> Result<Self> {
        let endpoint = resolve::parse_udp_dest(path)?;
        let addrs = resolve::resolve(&endpoint, path)?;
        let socket = resolve::connect_first(&addrs, path)?;
        if let Ok(peer) = socket.peer_addr() {
            log::debug!("UDP destination connected to {}", peer);
        }

        Ok(UdpDestination {
            config,
            fd: FdGuard::new(socket.into_raw_fd()),
        })
    }

    fn drain_loop(&self, ring: &BufferRing, stats: &Mutex<DestinationStats>) -> Result<()> {
        let fd = self.fd.fd();
        let send_interval = if self.config.max_datagram_rate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / self.config.max_datagram_rate))
        } else {
            None
        };
        let mut next_send = Instant::now();
        let mut n_min = PREFIX_LEN;

        loop {
            let mut batch = ring.consumer_start_batch(n_min, usize::MAX)?;
            if batch.n < n_min {
                // The ring only returns short once EOF is set.
                if batch.n != 0 {
                    log::warn!(
                        "unexpected EOF with partial datagram ({} bytes held)",
                        batch.n
                    );
                }
                break;
            }

            let mut prefix = [0u8; PREFIX_LEN];
            batch.copy_and_remove(&mut prefix);
            let dg_len = frame::decode_prefix(prefix);
            if batch.n < dg_len {
                // Ask the ring for a view that holds the whole datagram.
                n_min = PREFIX_LEN + dg_len;
                continue;
            }

            if let Some(interval) = send_interval {
                let now = Instant::now();
                if now < next_send {
                    thread::sleep(next_send - now);
                }
            }

            let view = batch.limit(dg_len);
            let (a, b) = view.slices();
            debug_assert_eq!(frame::total_len([a, b]), dg_len);
            let mut iovs = [libc::iovec {
                iov_base: std::ptr::null_mut(),
                iov_len: 0,
            }; 2];
            let mut n_iov = 0;
            for seg in [a, b] {
                if !seg.is_empty() {
                    iovs[n_iov] = libc::iovec {
                        iov_base: seg.as_ptr() as *mut libc::c_void,
                        iov_len: seg.len(),
                    };
                    n_iov += 1;
                }
            }
            // SAFETY: msghdr is a C struct for which all-zeros is a valid
            // initial state; iovs points at ring storage valid until the
            // consumer commit below.
            let mut msg: libc::msghdr = unsafe { mem::zeroed() };
            msg.msg_iov = iovs.as_mut_ptr();
            msg.msg_iovlen = n_iov as _;
            let ret = unsafe { libc::sendmsg(fd, &msg, 0) };
            if ret < 0 {
                return Err(Error::Syscall {
                    op: "sendmsg",
                    source: io::Error::last_os_error(),
                });
            }

            ring.consumer_commit_batch(PREFIX_LEN + dg_len)?;
            if let Some(interval) = send_interval {
                next_send += interval;
            }
            n_min = PREFIX_LEN;

            let mut s = stats.lock();
            s.n_datagrams_sent += 1;
            s.n_bytes_sent += dg_len as u64;
        }
        Ok(())
    }
}

impl DatagramDestination for UdpDestination {
    fn copy_from_ring(&self, ring: &BufferRing, stats: &Mutex<DestinationStats>) -> Result<()> {
        let result = self.drain_loop(ring, stats);
        self.fd.close();
        result
    }
}
