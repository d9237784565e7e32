//! Owned descriptor with the force-EOF close protocol
//!
//! Each source and destination owns exactly one socket or file descriptor.
//! `force_eof` (called from another thread) flags the owner and closes the
//! descriptor; the blocked worker observes the resulting `EBADF`, consults
//! the flag, and treats the wake-up as a planned EOF rather than a fault.
//! Close is idempotent, and the guard closes on drop as a last resort.

use parking_lot::Mutex;
use std::os::unix::io::RawFd;

struct FdState {
    fd: RawFd,
    force_eof: bool,
    closed: bool,
}

/// Mutex-guarded descriptor shared between a worker loop and `force_eof`
/// callers
pub(crate) struct FdGuard {
    state: Mutex<FdState>,
}

impl FdGuard {
    pub fn new(fd: RawFd) -> Self {
        FdGuard {
            state: Mutex::new(FdState {
                fd,
                force_eof: false,
                closed: false,
            }),
        }
    }

    /// Descriptor for the next blocking call. Returns -1 once closed, which
    /// makes the call fail with `EBADF` instead of touching a reused fd.
    pub fn fd(&self) -> RawFd {
        self.state.lock().fd
    }

    /// Whether a planned EOF was requested.
    pub fn is_forced(&self) -> bool {
        self.state.lock().force_eof
    }

    /// Request a planned EOF: set the flag, then close the descriptor so a
    /// blocked system call wakes (at worst within one timeout quantum).
    pub fn force_eof(&self) {
        let mut st = self.state.lock();
        st.force_eof = true;
        if !st.closed {
            st.closed = true;
            // SAFETY: fd is owned by this guard and closed exactly once.
            unsafe {
                libc::close(st.fd);
            }
            st.fd = -1;
        }
    }

    /// Close the descriptor on a normal exit path. No-op if `force_eof`
    /// already closed it.
    pub fn close(&self) {
        let mut st = self.state.lock();
        if !st.closed {
            st.closed = true;
            // SAFETY: fd is owned by this guard and closed exactly once.
            unsafe {
                libc::close(st.fd);
            }
            st.fd = -1;
        }
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_fds() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_force_eof_closes_once() {
        let (r, w) = pipe_fds();
        let guard = FdGuard::new(r);
        assert!(!guard.is_forced());
        guard.force_eof();
        assert!(guard.is_forced());
        assert_eq!(guard.fd(), -1);
        // Second close attempts are no-ops.
        guard.force_eof();
        guard.close();
        unsafe {
            libc::close(w);
        }
    }

    #[test]
    fn test_close_then_force_eof_keeps_flag() {
        let (r, w) = pipe_fds();
        let guard = FdGuard::new(r);
        guard.close();
        guard.force_eof();
        assert!(guard.is_forced());
        unsafe {
            libc::close(w);
        }
    }
}
