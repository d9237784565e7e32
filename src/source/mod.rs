//! Datagram sources
//!
//! A source pumps datagrams into the ring backlog until its input ends,
//! a timeout infers an EOF, or another thread forces one.

mod file;
mod random;
mod udp;

pub use file::FileSource;
pub use random::RandomSource;
pub use udp::UdpSource;

use crate::config::DgConfig;
use crate::error::Result;
use crate::ring::BufferRing;
use crate::stats::SourceStats;
use parking_lot::Mutex;
use std::sync::Arc;

/// A producer of datagrams
pub trait DatagramSource: Send + Sync {
    /// Copy datagrams into the ring until input ends or EOF is forced.
    /// Runs on the dedicated source thread.
    fn copy_to_ring(&self, ring: &BufferRing, stats: &Mutex<SourceStats>) -> Result<()>;

    /// Request a planned EOF as soon as possible. Called from other
    /// threads; non-blocking and idempotent.
    fn force_eof(&self);
}

/// Create a source from an endpoint URI: `udp://[bind:]port`,
/// `random://?k=v…`, `file://path`, a bare path, or `-`/`stdin`.
pub fn create(config: &Arc<DgConfig>, path: &str) -> Result<Arc<dyn DatagramSource>> {
    if path.starts_with("udp://") {
        Ok(Arc::new(UdpSource::new(Arc::clone(config), path)?))
    } else if path.starts_with("random://") {
        Ok(Arc::new(RandomSource::new(Arc::clone(config), path)?))
    } else {
        Ok(Arc::new(FileSource::new(Arc::clone(config), path)?))
    }
}
