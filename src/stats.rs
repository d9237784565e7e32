//! Real-time progress statistics
//!
//! Three stat groups — source, destination, ring — each live behind their
//! own mutex. Counters are updated only by the thread that owns the
//! underlying datum: the source thread maintains [`SourceStats`], the
//! destination thread [`DestinationStats`], and the ring producer updates
//! [`RingStats`] inside its critical section before publishing a copy.
//! Snapshots acquire one lock at a time, so lock order never matters.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Instant;

/// Stats maintained by the datagram source
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Maximum number of datagrams produced by a single batch receive
    pub max_clump_size: u64,
    /// Wall-clock time the first datagram was produced
    pub start_wall: Option<DateTime<Utc>>,
    /// Monotonic time the first datagram was produced
    pub start_mono: Option<Instant>,
    /// Monotonic time the last datagram was produced
    pub end_mono: Option<Instant>,
}

impl SourceStats {
    /// Record one accepted batch of `clump` datagrams observed at `now`.
    pub fn note_batch(&mut self, clump: u64, now: Instant) {
        if self.start_mono.is_none() {
            self.start_mono = Some(now);
            self.start_wall = Some(Utc::now());
        }
        self.end_mono = Some(now);
        self.max_clump_size = self.max_clump_size.max(clump);
    }

    /// Seconds between the first and last produced datagram.
    pub fn elapsed_secs(&self) -> f64 {
        match (self.start_mono, self.end_mono) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn brief(&self) -> String {
        let start = match self.start_wall {
            Some(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            None => "-".to_string(),
        };
        format!(
            "max_clump_size={}, start_time={}, elapsed_secs={:.6}",
            self.max_clump_size,
            start,
            self.elapsed_secs()
        )
    }
}

/// Stats maintained by the datagram destination
#[derive(Debug, Clone, Default)]
pub struct DestinationStats {
    /// Datagrams sent (UDP destinations only; stream destinations do not
    /// re-parse boundaries)
    pub n_datagrams_sent: u64,
    /// Payload bytes drained to the destination
    pub n_bytes_sent: u64,
}

impl DestinationStats {
    pub fn brief(&self) -> String {
        format!(
            "n_datagrams_sent={}, n_bytes_sent={}",
            self.n_datagrams_sent, self.n_bytes_sent
        )
    }
}

/// Stats maintained by the ring backlog between source and destination
#[derive(Debug, Clone, Default)]
pub struct RingStats {
    /// High-water mark of bytes buffered for writing
    pub max_backlog_bytes: usize,
    /// Number of datagrams produced
    pub n_datagrams: u64,
    /// Number of datagrams discarded (truncated or ancillary)
    pub n_datagrams_discarded: u64,
    /// Number of datagram bytes produced, not including length prefixes
    pub n_datagram_bytes: u64,
    /// Minimum datagram size produced
    pub min_datagram_size: usize,
    /// Maximum datagram size produced
    pub max_datagram_size: usize,
    /// Size of the first datagram produced
    pub first_datagram_size: usize,
}

impl RingStats {
    pub fn brief(&self) -> String {
        format!(
            "max_backlog_bytes={}, n_datagrams={}, n_datagrams_discarded={}, \
             n_datagram_bytes={}, min_datagram_size={}, max_datagram_size={}, \
             first_datagram_size={}",
            self.max_backlog_bytes,
            self.n_datagrams,
            self.n_datagrams_discarded,
            self.n_datagram_bytes,
            self.min_datagram_size,
            self.max_datagram_size,
            self.first_datagram_size
        )
    }
}

/// A consistent snapshot of all stat groups
#[derive(Debug, Clone)]
pub struct CopierStats {
    /// Incremented for each snapshot taken
    pub stat_seq: u64,
    pub source: SourceStats,
    pub destination: DestinationStats,
    pub ring: RingStats,
}

impl CopierStats {
    pub fn elapsed_secs(&self) -> f64 {
        self.source.elapsed_secs()
    }

    /// Datagrams per second across the copy. Start and end times mark the
    /// first and last datagram, so the intervals between datagrams number
    /// one less than the datagrams themselves.
    pub fn throughput_datagrams_per_sec(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs == 0.0 {
            return 0.0;
        }
        (self.ring.n_datagrams.max(1) - 1) as f64 / secs
    }

    /// Bytes per second across the copy; the first datagram's bytes fall
    /// outside the measured interval and are excluded.
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs == 0.0 {
            return 0.0;
        }
        let first = self.ring.first_datagram_size as u64;
        (self.ring.n_datagram_bytes.max(first) - first) as f64 / secs
    }

    pub fn mean_datagram_size(&self) -> f64 {
        if self.ring.n_datagrams == 0 {
            0.0
        } else {
            self.ring.n_datagram_bytes as f64 / self.ring.n_datagrams as f64
        }
    }

    /// One-line summary for SIGUSR1 dumps and shutdown reporting.
    pub fn brief(&self) -> String {
        format!(
            "{}, {}, {}, elapsed_secs={:.6}, throughput_datagrams_per_sec={:.3}, \
             throughput_bytes_per_sec={:.3}, mean_datagram_size={:.1}",
            self.source.brief(),
            self.ring.brief(),
            self.destination.brief(),
            self.elapsed_secs(),
            self.throughput_datagrams_per_sec(),
            self.throughput_bytes_per_sec(),
            self.mean_datagram_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_note_batch_tracks_first_and_last() {
        let mut stats = SourceStats::default();
        let t0 = Instant::now();
        stats.note_batch(3, t0);
        stats.note_batch(1, t0 + Duration::from_secs(2));
        assert_eq!(stats.max_clump_size, 3);
        assert_eq!(stats.start_mono, Some(t0));
        assert!((stats.elapsed_secs() - 2.0).abs() < 1e-6);
        assert!(stats.start_wall.is_some());
    }

    #[test]
    fn test_elapsed_zero_before_first_datagram() {
        let stats = SourceStats::default();
        assert_eq!(stats.elapsed_secs(), 0.0);
    }

    #[test]
    fn test_throughput_counts_intervals_not_datagrams() {
        let t0 = Instant::now();
        let mut source = SourceStats::default();
        source.note_batch(1, t0);
        source.note_batch(1, t0 + Duration::from_secs(1));

        let stats = CopierStats {
            stat_seq: 0,
            source,
            destination: DestinationStats::default(),
            ring: RingStats {
                n_datagrams: 11,
                n_datagram_bytes: 1100,
                first_datagram_size: 100,
                ..RingStats::default()
            },
        };
        // 11 datagrams over 1 second = 10 intervals/second
        assert!((stats.throughput_datagrams_per_sec() - 10.0).abs() < 1e-6);
        // first datagram's 100 bytes excluded
        assert!((stats.throughput_bytes_per_sec() - 1000.0).abs() < 1e-6);
        assert!((stats.mean_datagram_size() - 100.0).abs() < 1e-6);
    }
}
