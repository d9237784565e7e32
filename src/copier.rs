//! Copy orchestration
//!
//! The copier owns the ring, a source, a destination, and the worker
//! threads that drive them:
//!
//! - the **destination thread** drains the ring; when it exits (normally
//!   or on error) it forces EOF on the source so the source can never
//!   block forever feeding a dead sink;
//! - the **source thread** fills the ring; when it exits it sets the
//!   ring's EOF flag so the destination drains the backlog and stops;
//! - an optional **signal thread** turns the first SIGINT into a graceful
//!   drain, a second SIGINT into an abort, and SIGUSR1 into a stats dump.
//!
//! The first error raised in either worker is captured and re-raised from
//! [`DatagramCopier::wait`]; later errors are suppressed. Worker panics are
//! caught so the cross-thread EOF handshake always runs.

use crate::config::DgConfig;
use crate::dest::{self, DatagramDestination};
use crate::error::{Error, Result};
use crate::ring::BufferRing;
use crate::source::{self, DatagramSource};
use crate::stats::{CopierStats, DestinationStats, RingStats, SourceStats};
use parking_lot::{Condvar, Mutex};
use signal_hook::consts::{SIGINT, SIGUSR1};
use signal_hook::iterator::Signals;
use signal_hook::iterator::backend::Handle;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct CopierInner {
    /// First error raised in a worker thread; re-raised from `wait()`
    error: Option<Error>,
    /// True while the signal thread is consuming signals
    signal_waiting: bool,
    stat_seq: u64,
}

/// State shared between the copier handle and its threads
struct CopierShared {
    ring: Arc<BufferRing>,
    source: Arc<dyn DatagramSource>,
    destination: Arc<dyn DatagramDestination>,
    source_stats: Arc<Mutex<SourceStats>>,
    destination_stats: Arc<Mutex<DestinationStats>>,
    ring_stats: Arc<Mutex<RingStats>>,
    inner: Mutex<CopierInner>,
    cond: Condvar,
}

impl CopierShared {
    fn store_first_error(&self, error: Error) {
        let mut inner = self.inner.lock();
        if inner.error.is_none() {
            inner.error = Some(error);
        } else {
            log::debug!("suppressing later worker error: {}", error);
        }
    }

    fn get_stats(&self) -> CopierStats {
        let stat_seq = {
            let mut inner = self.inner.lock();
            let seq = inner.stat_seq;
            inner.stat_seq += 1;
            seq
        };
        // One lock at a time; order is irrelevant.
        CopierStats {
            stat_seq,
            source: self.source_stats.lock().clone(),
            destination: self.destination_stats.lock().clone(),
            ring: self.ring_stats.lock().clone(),
        }
    }

    fn signal_loop(&self, mut signals: Signals) {
        log::debug!("signal thread started");
        {
            self.inner.lock().signal_waiting = true;
        }

        let mut n_sigint = 0;
        for sig in signals.forever() {
            if self.ring.is_eof() {
                log::debug!("EOF observed; exiting signal thread");
                break;
            }
            match sig {
                SIGINT => {
                    n_sigint += 1;
                    if n_sigint >= 2 {
                        eprintln!("received SIGINT twice; aborting");
                        process::exit(1);
                    }
                    log::info!("forcing EOF due to SIGINT");
                    self.source.force_eof();
                }
                SIGUSR1 => {
                    log::debug!("dumping stats due to SIGUSR1");
                    eprintln!("{}", self.get_stats().brief());
                }
                _ => {}
            }
            if self.ring.is_eof() {
                log::debug!("EOF observed; exiting signal thread");
                break;
            }
        }

        {
            self.inner.lock().signal_waiting = false;
        }
        self.cond.notify_all();
        log::debug!("signal thread shutting down");
    }
}

/// Copies datagrams from an abstract source to an abstract destination
pub struct DatagramCopier {
    config: Arc<DgConfig>,
    shared: Arc<CopierShared>,
    source_thread: Option<JoinHandle<()>>,
    destination_thread: Option<JoinHandle<()>>,
    signal_thread: Option<JoinHandle<()>>,
    signal_handle: Option<Handle>,
}

impl DatagramCopier {
    /// Build a copier from source and destination endpoint URIs.
    pub fn new(config: Arc<DgConfig>, src: &str, dst: &str) -> Result<Self> {
        let source = source::create(&config, src)?;
        let destination = dest::create(&config, dst)?;
        Ok(Self::with_endpoints(config, source, destination))
    }

    /// Build a copier from already-constructed endpoints.
    pub fn with_endpoints(
        config: Arc<DgConfig>,
        source: Arc<dyn DatagramSource>,
        destination: Arc<dyn DatagramDestination>,
    ) -> Self {
        let ring_stats = Arc::new(Mutex::new(RingStats::default()));
        let ring = Arc::new(BufferRing::new(config.max_backlog, Arc::clone(&ring_stats)));
        DatagramCopier {
            config,
            shared: Arc::new(CopierShared {
                ring,
                source,
                destination,
                source_stats: Arc::new(Mutex::new(SourceStats::default())),
                destination_stats: Arc::new(Mutex::new(DestinationStats::default())),
                ring_stats,
                inner: Mutex::new(CopierInner {
                    error: None,
                    signal_waiting: false,
                    stat_seq: 0,
                }),
                cond: Condvar::new(),
            }),
            source_thread: None,
            destination_thread: None,
            signal_thread: None,
            signal_handle: None,
        }
    }

    /// Spawn the worker threads (and the signal thread when configured).
    pub fn start(&mut self) -> Result<()> {
        if self.config.handle_signals {
            let signals = Signals::new([SIGINT, SIGUSR1]).map_err(Error::Io)?;
            self.signal_handle = Some(signals.handle());
            let shared = Arc::clone(&self.shared);
            self.signal_thread = Some(
                thread::Builder::new()
                    .name("dgram-signals".to_string())
                    .spawn(move || shared.signal_loop(signals))?,
            );
        }

        let shared = Arc::clone(&self.shared);
        self.destination_thread = Some(
            thread::Builder::new()
                .name("dgram-dest".to_string())
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        shared
                            .destination
                            .copy_from_ring(&shared.ring, &shared.destination_stats)
                    }))
                    .unwrap_or(Err(Error::ThreadPanic));
                    if let Err(e) = result {
                        shared.store_first_error(e);
                    }
                    // The source must never block forever feeding a dead
                    // sink.
                    shared.source.force_eof();
                    log::debug!("destination thread exiting");
                })?,
        );

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("dgram-source".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    shared.source.copy_to_ring(&shared.ring, &shared.source_stats)
                }))
                .unwrap_or(Err(Error::ThreadPanic));
                if let Err(e) = result {
                    shared.store_first_error(e);
                }
                shared.ring.producer_set_eof();
                log::debug!("source thread exiting");
            });
        match spawned {
            Ok(handle) => self.source_thread = Some(handle),
            Err(e) => {
                // The destination is already draining; without a producer
                // it must see EOF or it will wait forever.
                self.shared.ring.producer_set_eof();
                return Err(Error::Io(e));
            }
        }
        Ok(())
    }

    /// Join the workers, shut down the signal thread, and re-raise the
    /// first captured worker error.
    pub fn wait(&mut self) -> Result<()> {
        if let Some(handle) = self.source_thread.take()
            && handle.join().is_err()
        {
            self.shared.store_first_error(Error::ThreadPanic);
        }
        if let Some(handle) = self.destination_thread.take()
            && handle.join().is_err()
        {
            self.shared.store_first_error(Error::ThreadPanic);
        }

        if let Some(handle) = self.signal_thread.take() {
            if let Some(signal_handle) = self.signal_handle.take() {
                // Wake the signal thread and wait for it to report that it
                // left the signal wait; re-close on each retry in case the
                // first close raced its startup.
                loop {
                    signal_handle.close();
                    let mut inner = self.shared.inner.lock();
                    if !inner.signal_waiting {
                        break;
                    }
                    self.shared
                        .cond
                        .wait_for(&mut inner, Duration::from_secs(1));
                    if !inner.signal_waiting {
                        break;
                    }
                }
            }
            let _ = handle.join();
        }

        match self.shared.inner.lock().error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Force an EOF condition on the source as soon as possible. Safe to
    /// call from any thread, any number of times.
    pub fn force_eof(&self) {
        self.shared.source.force_eof();
    }

    /// `force_eof` then `wait`.
    pub fn close(&mut self) -> Result<()> {
        self.force_eof();
        self.wait()
    }

    /// Consistent snapshot of source, destination, and ring statistics.
    /// Each call advances the snapshot sequence number.
    pub fn get_stats(&self) -> CopierStats {
        self.shared.get_stats()
    }
}

impl Drop for DatagramCopier {
    fn drop(&mut self) {
        if self.source_thread.is_some()
            || self.destination_thread.is_some()
            || self.signal_thread.is_some()
        {
            self.force_eof();
            if let Err(e) = self.wait() {
                log::error!("error during copier shutdown: {}", e);
            }
        }
    }
}
