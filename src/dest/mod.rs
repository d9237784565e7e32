//! Datagram destinations
//!
//! A destination drains the ring backlog until the ring is empty and
//! EOF-flagged. UDP destinations re-split the stream on the framing
//! prefixes so each payload leaves as one datagram; stream destinations
//! pass the framed bytes through untouched.

mod file;
mod udp;

pub use file::FileDestination;
pub use udp::UdpDestination;

use crate::config::DgConfig;
use crate::error::{Error, Result};
use crate::ring::BufferRing;
use crate::stats::DestinationStats;
use parking_lot::Mutex;
use std::sync::Arc;

/// A consumer of datagrams
pub trait DatagramDestination: Send + Sync {
    /// Drain the ring until it is empty with EOF set. Runs on the
    /// dedicated destination thread.
    fn copy_from_ring(&self, ring: &BufferRing, stats: &Mutex<DestinationStats>) -> Result<()>;
}

/// Create a destination from an endpoint URI: `udp://host:port`,
/// `file://path`, a bare path, or `-`/`stdout`.
pub fn create(config: &Arc<DgConfig>, path: &str) -> Result<Arc<dyn DatagramDestination>> {
    if path.starts_with("udp://") {
        Ok(Arc::new(UdpDestination::new(Arc::clone(config), path)?))
    } else if path.starts_with("random://") {
        Err(Error::Endpoint(format!(
            "random:// is only usable as a source: {}",
            path
        )))
    } else {
        Ok(Arc::new(FileDestination::new(Arc::clone(config), path)?))
    }
}
