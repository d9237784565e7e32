//! setu-dgram - copy datagram streams while preserving message boundaries
//!
//! Reads datagrams from a UDP socket, file, pipe, or synthetic generator
//! and forwards them to a UDP socket, file, or pipe. On byte-stream
//! transports each datagram is framed with a 4-byte big-endian length
//! prefix so boundaries survive the stream format. A bounded byte ring
//! decouples the source and destination worker threads.

pub mod config;
pub mod copier;
pub mod dest;
pub mod error;
mod fdio;
pub mod frame;
pub mod resolve;
pub mod ring;
pub mod source;
pub mod stats;

// Re-export commonly used types
pub use config::DgConfig;
pub use copier::DatagramCopier;
pub use error::{Error, Result};
pub use stats::CopierStats;
