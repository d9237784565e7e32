//! Synthetic datagram source
//!
//! Generates random-length payloads of ASCII hex digits, mainly for
//! exercising destinations and measuring throughput without a real
//! producer. Configured through a query-style URI:
//!
//! `random://?n=1000&min_size=0&max_size=1472&seed=42`
//!
//! `n` of 0 generates forever; `seed` of 0 draws a seed from OS entropy.
//! A missing `?` is tolerated; unrecognized keys are rejected.

use crate::config::DgConfig;
use crate::error::{Error, Result};
use crate::ring::{BufferRing, MsgRef};
use crate::source::DatagramSource;
use crate::stats::SourceStats;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Default max payload size; fits a single UDP packet on a 1500 MTU link
const DEFAULT_MAX_SIZE: usize = 1472;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Datagram source that generates random payloads
pub struct RandomSource {
    config: Arc<DgConfig>,
    /// Number of datagrams to generate; 0 means forever
    pub(crate) n_to_generate: u64,
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) seed: u64,
    force_eof: AtomicBool,
}

impl RandomSource {
    pub fn new(config: Arc<DgConfig>, path: &str) -> Result<Self> {
        let mut n_to_generate: u64 = 0;
        let mut min_size: usize = 0;
        let mut max_size: usize = DEFAULT_MAX_SIZE;
        let mut seed: u64 = 0;

        let mut args = path.strip_prefix("random://").unwrap_or(path);
        args = args.strip_prefix('?').unwrap_or(args);
        for key_val in args.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = key_val.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "invalid argument to random:// (missing '='): {}",
                    key_val
                ))
            })?;
            let parse = |what: &str| {
                value
                    .parse::<u64>()
                    .map_err(|_| Error::Config(format!("invalid {} for random://: {}", what, value)))
            };
            match key {
                "n" => n_to_generate = parse("count")?,
                "min_size" => min_size = parse("min_size")? as usize,
                "max_size" => max_size = parse("max_size")? as usize,
                "seed" => seed = parse("seed")?,
                other => {
                    return Err(Error::Config(format!(
                        "invalid random:// argument: {}",
                        other
                    )));
                }
            }
        }

        if min_size > max_size {
            return Err(Error::Config(format!(
                "random:// min_size {} exceeds max_size {}",
                min_size, max_size
            )));
        }

        if seed == 0 {
            seed = rand::random();
            log::debug!("random source drew seed {} from OS entropy", seed);
        }

        Ok(RandomSource {
            config,
            n_to_generate,
            min_size,
            max_size,
            seed,
            force_eof: AtomicBool::new(false),
        })
    }
}

impl DatagramSource for RandomSource {
    fn copy_to_ring(&self, ring: &BufferRing, stats: &Mutex<SourceStats>) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut scratch = vec![0u8; self.config.max_datagram_size.max(self.max_size)];
        let mut n_datagrams: u64 = 0;

        loop {
            if self.n_to_generate != 0 && n_datagrams >= self.n_to_generate {
                log::debug!("generated {} datagrams; stopping", n_datagrams);
                break;
            }
            if self.config.max_datagrams != 0 && n_datagrams >= self.config.max_datagrams {
                log::debug!("copied {} datagrams; stopping at limit", n_datagrams);
                break;
            }
            if self.force_eof.load(Ordering::Relaxed) {
                log::debug!("forced EOF; stopping generation");
                break;
            }

            let dg_size = rng.random_range(self.min_size..=self.max_size);
            log::trace!("generating datagram of {} bytes", dg_size);
            for byte in &mut scratch[..dg_size] {
                *byte = HEX_DIGITS[rng.random_range(0..HEX_DIGITS.len())];
            }

            let now = Instant::now();
            ring.producer_commit_batch(&[MsgRef::data(&scratch[..dg_size])])?;
            n_datagrams += 1;

            stats.lock().note_batch(1, now);
        }
        Ok(())
    }

    fn force_eof(&self) {
        self.force_eof.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<DgConfig> {
        Arc::new(DgConfig {
            max_datagram_size: 2048,
            max_backlog: 1024 * 1024,
            ..DgConfig::default()
        })
    }

    #[test]
    fn test_defaults() {
        let source = RandomSource::new(config(), "random://").unwrap();
        assert_eq!(source.n_to_generate, 0);
        assert_eq!(source.min_size, 0);
        assert_eq!(source.max_size, DEFAULT_MAX_SIZE);
        assert_ne!(source.seed, 0); // drawn from entropy
    }

    #[test]
    fn test_query_parsing() {
        let source =
            RandomSource::new(config(), "random://?n=100&min_size=8&max_size=64&seed=42").unwrap();
        assert_eq!(source.n_to_generate, 100);
        assert_eq!(source.min_size, 8);
        assert_eq!(source.max_size, 64);
        assert_eq!(source.seed, 42);
    }

    #[test]
    fn test_missing_question_mark_tolerated() {
        let source = RandomSource::new(config(), "random://n=5&seed=1").unwrap();
        assert_eq!(source.n_to_generate, 5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            RandomSource::new(config(), "random://?bogus=1"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_equals_rejected() {
        assert!(matches!(
            RandomSource::new(config(), "random://?n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_min_above_max_rejected() {
        assert!(matches!(
            RandomSource::new(config(), "random://?min_size=10&max_size=5"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_generation_is_deterministic_by_seed() {
        use crate::stats::RingStats;

        let generate = || {
            let config = config();
            let ring_stats = Arc::new(Mutex::new(RingStats::default()));
            let ring = BufferRing::new(config.max_backlog, Arc::clone(&ring_stats));
            let stats = Mutex::new(SourceStats::default());
            let source =
                RandomSource::new(config, "random://?n=50&min_size=0&max_size=100&seed=7")
                    .unwrap();
            source.copy_to_ring(&ring, &stats).unwrap();
            ring.producer_set_eof();
            let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
            let (a, b) = batch.slices();
            let mut out = a.to_vec();
            out.extend_from_slice(b);
            out
        };
        let first = generate();
        let second = generate();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_payloads_are_hex_digits() {
        use crate::stats::RingStats;

        let config = config();
        let ring_stats = Arc::new(Mutex::new(RingStats::default()));
        let ring = BufferRing::new(config.max_backlog, Arc::clone(&ring_stats));
        let stats = Mutex::new(SourceStats::default());
        let source =
            RandomSource::new(config, "random://?n=20&min_size=16&max_size=16&seed=3").unwrap();
        source.copy_to_ring(&ring, &stats).unwrap();
        ring.producer_set_eof();

        let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
        let (a, b) = batch.slices();
        let mut bytes = a.to_vec();
        bytes.extend_from_slice(b);
        // Fixed 16-byte payloads: parse and check every frame.
        assert_eq!(bytes.len(), 20 * 20);
        for frame in bytes.chunks(20) {
            assert_eq!(u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]), 16);
            assert!(frame[4..].iter().all(u8::is_ascii_hexdigit));
        }
    }
}
