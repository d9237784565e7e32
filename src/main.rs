//! setu-dgram - datagram stream copy daemon entry point

use clap::Parser;
use setu_dgram::config::{
    DEFAULT_MAX_BACKLOG, DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_MAX_READ_SIZE, DEFAULT_MAX_WRITE_SIZE,
};
use setu_dgram::{DatagramCopier, DgConfig, Result};
use std::error::Error as _;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "setu-dgram", version)]
#[command(about = "Copy between datagram streams while preserving message boundaries.")]
#[command(long_about = "Copy between datagram streams while preserving message boundaries.\n\n\
    Reads datagrams from a UDP socket, file, or pipe, and forwards them to \
    another UDP socket, file, or pipe. For files and pipes, each datagram is \
    prefixed with a 4-byte length field in network byte order (big-endian).")]
struct Args {
    /// Per-datagram buffer size in bytes, not including the length prefix
    #[arg(long, default_value_t = DEFAULT_MAX_DATAGRAM_SIZE)]
    max_datagram_size: usize,

    /// Maximum number of unwritten bytes to buffer between source and
    /// destination, including length prefixes
    #[arg(short = 'b', long, default_value_t = DEFAULT_MAX_BACKLOG)]
    max_backlog: usize,

    /// For UDP sources, seconds with no datagrams received that should be
    /// interpreted as an EOF. If <= 0, allows unlimited time between
    /// datagrams (copying will not terminate until a signal is received)
    #[arg(short = 't', long, default_value_t = 0.0)]
    eof_timeout: f64,

    /// For UDP sources, seconds to wait for the first datagram. If < 0,
    /// the value of --eof-timeout is used; 0 waits forever
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    start_timeout: f64,

    /// For UDP destinations, the maximum datagrams per second to send.
    /// If <= 0, the send rate is not limited
    #[arg(short = 'r', long, default_value_t = -1.0, allow_hyphen_values = true)]
    max_datagram_rate: f64,

    /// Stop after copying this many datagrams; 0 copies all datagrams
    #[arg(short = 'n', long, default_value_t = 0)]
    max_datagrams: u64,

    /// Maximum number of bytes to read in one system call
    #[arg(long, default_value_t = DEFAULT_MAX_READ_SIZE)]
    max_read_size: usize,

    /// Maximum number of bytes to write in one system call
    #[arg(long, default_value_t = DEFAULT_MAX_WRITE_SIZE)]
    max_write_size: usize,

    /// Number of receive slots for batched UDP receive; 0 uses the
    /// platform maximum
    #[arg(long, default_value_t = 0)]
    max_iovecs: usize,

    /// For file destinations, append to the file instead of truncating it
    #[arg(short = 'a', long)]
    append: bool,

    /// Do not install the SIGINT/SIGUSR1 handling thread
    #[arg(long)]
    no_handle_signals: bool,

    /// Log level: error, warn, info, debug, or trace
    #[arg(short = 'l', long, default_value = "warn")]
    log_level: String,

    /// On fatal errors, print the full error cause chain
    #[arg(long)]
    tb: bool,

    /// Datagram source: a filename, "file://<filename>",
    /// "udp://<local-port>", "udp://<bind-addr>:<local-port>",
    /// "random://[?n=<num>&min_size=<min>&max_size=<max>&seed=<seed>]",
    /// or "-"/"stdin"
    #[arg(default_value = "-")]
    src: String,

    /// Datagram destination: a filename, "file://<filename>",
    /// "udp://<remote-addr>:<remote-port>", or "-"/"stdout"
    #[arg(default_value = "-")]
    dst: String,
}

fn main() {
    let args = Args::parse();

    if log::LevelFilter::from_str(&args.log_level).is_err() {
        eprintln!("invalid log level: {}", args.log_level);
        process::exit(1);
    }
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.clone()),
    )
    .init();

    if let Err(e) = run(&args) {
        eprintln!("setu-dgram: {}", e);
        if args.tb {
            let mut cause = e.source();
            while let Some(c) = cause {
                eprintln!("  caused by: {}", c);
                cause = c.source();
            }
        }
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = DgConfig {
        max_datagram_size: args.max_datagram_size,
        max_backlog: args.max_backlog,
        eof_timeout: args.eof_timeout,
        start_timeout: args.start_timeout,
        max_datagram_rate: args.max_datagram_rate,
        max_datagrams: args.max_datagrams,
        max_read_size: args.max_read_size,
        max_write_size: args.max_write_size,
        max_iovecs: args.max_iovecs,
        append: args.append,
        handle_signals: !args.no_handle_signals,
    }
    .normalized();
    config.validate()?;

    log::debug!(
        "starting copy with src='{}', dst='{}', config={:?}",
        args.src,
        args.dst,
        config
    );

    let mut copier = DatagramCopier::new(Arc::new(config), &args.src, &args.dst)?;
    copier.start()?;
    copier.wait()?;

    let stats = copier.get_stats();
    eprintln!("finished copying datagrams");
    eprintln!(
        "received {} datagrams totaling {} bytes (not including length prefixes)",
        stats.ring.n_datagrams, stats.ring.n_datagram_bytes
    );
    eprintln!("discarded {} datagrams", stats.ring.n_datagrams_discarded);
    eprintln!("max clump size: {} datagrams", stats.source.max_clump_size);
    eprintln!("min datagram size: {} bytes", stats.ring.min_datagram_size);
    eprintln!("max datagram size: {} bytes", stats.ring.max_datagram_size);
    eprintln!("mean datagram size: {:.1} bytes", stats.mean_datagram_size());
    eprintln!("elapsed time: {:.6} seconds", stats.elapsed_secs());
    eprintln!("max backlog: {} bytes", stats.ring.max_backlog_bytes);
    eprintln!(
        "throughput: {:.3} datagrams/second ({:.3} bytes/second)",
        stats.throughput_datagrams_per_sec(),
        stats.throughput_bytes_per_sec()
    );
    Ok(())
}
