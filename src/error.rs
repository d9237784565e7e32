//! Error types for setu-dgram
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Fatal Errors
//!
//! - **`Syscall`** / **`Io`**: A system call on a live descriptor failed.
//!   `EINTR` is retried inside the worker loops and never surfaces here;
//!   would-block/timeout is a normal EOF trigger on sources; a bad
//!   descriptor is cross-checked against the force-EOF flag before being
//!   reported.
//!
//! - **`BacklogMisuse`** / **`PayloadTooLarge`**: The producer/consumer
//!   protocol on the ring was violated (write after EOF, freeing more
//!   bytes than observed, a datagram that cannot fit the ring at all).
//!   These indicate a bug or misconfiguration and abort the copy.
//!
//! - **`ThreadPanic`**: A worker thread panicked. The copier still drives
//!   the cross-thread EOF handshake so the peer worker drains and exits.
//!
//! ## Configuration Errors (Fix and Rerun)
//!
//! - **`Config`**: A parameter or `random://` key is invalid.
//! - **`Endpoint`**: An endpoint URI could not be parsed, resolved, bound,
//!   or connected.
//!
//! Protocol-level trouble (truncated datagrams, ancillary messages, a
//! partial frame at end of stream) is logged and counted, never raised.

use thiserror::Error;

/// Errors that can occur while copying datagram streams
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op}() failed: {source}")]
    Syscall {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Endpoint error: {0}")]
    Endpoint(String),

    #[error("Datagram length {0} does not fit the 4-byte length prefix")]
    LengthOverflow(usize),

    #[error("Datagram + prefix too large for backlog: {len} + 4 bytes, max={capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("Backlog misuse: {0}")]
    BacklogMisuse(String),

    #[error("Worker thread panicked")]
    ThreadPanic,
}

pub type Result<T> = std::result::Result<T, Error>;
