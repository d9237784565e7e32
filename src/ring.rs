//! Bounded byte ring between source and destination
//!
//! The ring is the elastic backlog that decouples the source worker from
//! the destination worker. It is a fixed-size circular byte buffer with a
//! single-producer/single-consumer contract:
//!
//! - the **producer** (source thread) appends whole framed datagrams —
//!   4-byte big-endian length prefix plus payload — as one atomic unit,
//!   blocking while the ring lacks room;
//! - the **consumer** (destination thread) takes a view of whatever bytes
//!   are ready as one or two contiguous slices (two when the region wraps
//!   the end of the buffer), drains them, then commits the consumed count;
//! - a sticky **EOF flag**, set once by the producer side, tells the
//!   consumer to finish draining and stop.
//!
//! One mutex guards the indices, the EOF flag, and the producer-side
//! counters; separate not-full/not-empty condvars wake each side. The
//! producer holds the mutex across an entire prefix+payload append, so the
//! consumer never observes a partial frame.
//!
//! # Safety
//!
//! The storage is allocated once and never reallocated. Consumer batches
//! hand out slices of the occupied region while the lock is released; this
//! is sound because the producer only ever writes into the free region and
//! the occupied region only shrinks when the consumer itself commits.
//! Exactly one producer thread and one consumer thread may use the ring.

use crate::error::{Error, Result};
use crate::frame::{self, PREFIX_LEN};
use crate::stats::RingStats;
use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::time::Instant;

/// Classification of one received message, derived from kernel receive
/// flags by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// A complete datagram to forward
    Data,
    /// Out-of-band or error-queue message; discarded and counted
    Ancillary,
    /// Datagram longer than the receive buffer; discarded and counted
    Truncated,
}

/// One message handed to the producer for commit
#[derive(Debug, Clone, Copy)]
pub struct MsgRef<'a> {
    pub payload: &'a [u8],
    pub kind: MsgKind,
}

impl<'a> MsgRef<'a> {
    pub fn data(payload: &'a [u8]) -> Self {
        MsgRef {
            payload,
            kind: MsgKind::Data,
        }
    }
}

struct RingState {
    /// Next byte to be consumed
    head: usize,
    /// Next byte to be filled
    tail: usize,
    /// Occupied bytes; `0 <= count <= capacity`
    count: usize,
    /// Set once by the producer side, never cleared
    eof: bool,
    /// Producer-maintained counters, published to the shared group on commit
    stats: RingStats,
}

/// Fixed-capacity byte ring with producer-wait/consumer-wait and EOF
pub struct BufferRing {
    capacity: usize,
    data: *mut u8,
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
    shared_stats: Arc<Mutex<RingStats>>,
}

// SAFETY: the raw storage pointer is only dereferenced under the
// producer/consumer protocol described in the module docs; all index state
// is behind the mutex.
unsafe impl Send for BufferRing {}
unsafe impl Sync for BufferRing {}

impl Drop for BufferRing {
    fn drop(&mut self) {
        // SAFETY: `data` came from Box::into_raw of a boxed slice of
        // exactly `capacity` bytes and is dropped exactly once.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.data,
                self.capacity,
            )));
        }
    }
}

impl BufferRing {
    /// Create a ring of `capacity` bytes, publishing producer-side counters
    /// into `shared_stats`.
    pub fn new(capacity: usize, shared_stats: Arc<Mutex<RingStats>>) -> Self {
        let storage = vec![0u8; capacity].into_boxed_slice();
        BufferRing {
            capacity,
            data: Box::into_raw(storage) as *mut u8,
            state: Mutex::new(RingState {
                head: 0,
                tail: 0,
                count: 0,
                eof: false,
                stats: RingStats::default(),
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            shared_stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until at least `min(n_min, capacity)` bytes are free.
    /// Returns the current free count. Fails if EOF has been set.
    pub fn producer_reserve(&self, n_min: usize) -> Result<usize> {
        let mut st = self.state.lock();
        if st.eof {
            return Err(Error::BacklogMisuse(
                "producer attempted to reserve after EOF".to_string(),
            ));
        }
        let n_min = n_min.min(self.capacity);
        while self.capacity - st.count < n_min {
            self.not_full.wait(&mut st);
        }
        Ok(self.capacity - st.count)
    }

    /// Like [`BufferRing::producer_reserve`], but gives up at `deadline`.
    /// May return fewer than `n_min` free bytes on timeout.
    pub fn producer_reserve_until(&self, deadline: Instant, n_min: usize) -> Result<usize> {
        let mut st = self.state.lock();
        if st.eof {
            return Err(Error::BacklogMisuse(
                "producer attempted to reserve after EOF".to_string(),
            ));
        }
        let n_min = n_min.min(self.capacity);
        while self.capacity - st.count < n_min {
            if self.not_full.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        Ok(self.capacity - st.count)
    }

    /// Append a batch of framed datagrams, blocking for room as needed.
    ///
    /// Truncated and ancillary messages are counted as discarded and
    /// skipped. A single payload that cannot fit the ring even when empty
    /// fails with [`Error::PayloadTooLarge`]. Must not be called after EOF.
    pub fn producer_commit_batch(&self, msgs: &[MsgRef<'_>]) -> Result<()> {
        self.commit_batch_inner(msgs, None).map(|_| ())
    }

    /// Bounded variant of [`BufferRing::producer_commit_batch`]: returns
    /// the number of messages accepted before `deadline` expired.
    /// Discarded messages count as accepted.
    pub fn producer_commit_batch_until(
        &self,
        msgs: &[MsgRef<'_>],
        deadline: Instant,
    ) -> Result<usize> {
        self.commit_batch_inner(msgs, Some(deadline))
    }

    fn commit_batch_inner(&self, msgs: &[MsgRef<'_>], deadline: Option<Instant>) -> Result<usize> {
        if msgs.is_empty() {
            return Ok(0);
        }
        let mut st = self.state.lock();
        if st.eof {
            return Err(Error::BacklogMisuse(
                "producer attempted to write after EOF".to_string(),
            ));
        }

        let mut n_committed = 0usize;
        let mut need_notify = false;
        let mut need_publish = false;
        'msgs: for msg in msgs {
            match msg.kind {
                MsgKind::Ancillary => {
                    log::warn!("ancillary data discarded, len={} bytes", msg.payload.len());
                    st.stats.n_datagrams_discarded += 1;
                    need_publish = true;
                    n_committed += 1;
                    continue;
                }
                MsgKind::Truncated => {
                    log::warn!(
                        "datagram truncated; discarding, len={} bytes",
                        msg.payload.len()
                    );
                    st.stats.n_datagrams_discarded += 1;
                    need_publish = true;
                    n_committed += 1;
                    continue;
                }
                MsgKind::Data => {}
            }

            let dg_len = msg.payload.len();
            let need = dg_len + PREFIX_LEN;
            if self.capacity < need {
                return Err(Error::PayloadTooLarge {
                    len: dg_len,
                    capacity: self.capacity,
                });
            }
            if self.capacity - st.count < need {
                // Let the consumer drain what we have appended so far
                // before parking.
                if need_publish {
                    self.publish_stats(&st);
                    need_publish = false;
                }
                if need_notify {
                    self.not_empty.notify_one();
                    need_notify = false;
                }
                while self.capacity - st.count < need {
                    match deadline {
                        None => self.not_full.wait(&mut st),
                        Some(d) => {
                            if self.not_full.wait_until(&mut st, d).timed_out() {
                                break;
                            }
                        }
                    }
                }
                if self.capacity - st.count < need {
                    break 'msgs;
                }
            }

            let prefix = frame::encode_prefix(dg_len)?;
            self.put_locked(&mut st, &prefix);
            self.put_locked(&mut st, msg.payload);
            n_committed += 1;
            need_notify = true;

            let count = st.count;
            let s = &mut st.stats;
            if s.n_datagrams == 0 {
                s.first_datagram_size = dg_len;
                s.min_datagram_size = dg_len;
            } else {
                s.min_datagram_size = s.min_datagram_size.min(dg_len);
            }
            s.max_datagram_size = s.max_datagram_size.max(dg_len);
            s.max_backlog_bytes = s.max_backlog_bytes.max(count);
            s.n_datagrams += 1;
            s.n_datagram_bytes += dg_len as u64;
            need_publish = true;
        }

        if need_publish {
            self.publish_stats(&st);
        }
        if need_notify {
            self.not_empty.notify_one();
        }
        Ok(n_committed)
    }

    /// Mark end of input. Idempotent; wakes all waiters. The consumer
    /// keeps draining until the ring is empty.
    pub fn producer_set_eof(&self) {
        let mut st = self.state.lock();
        st.eof = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_eof(&self) -> bool {
        self.state.lock().eof
    }

    /// Wait until at least `n_min` bytes are ready or EOF is set, then
    /// return a view of at most `n_max` readable bytes. The view may hold
    /// fewer than `n_min` bytes (even zero) only once EOF is set.
    pub fn consumer_start_batch(&self, n_min: usize, n_max: usize) -> Result<ConsumerBatch<'_>> {
        if n_min > self.capacity {
            return Err(Error::BacklogMisuse(format!(
                "consumer requested {} bytes, capacity is {} bytes",
                n_min, self.capacity
            )));
        }
        let mut st = self.state.lock();
        while st.count < n_min && !st.eof {
            self.not_empty.wait(&mut st);
        }
        Ok(self.batch_locked(&st, n_max))
    }

    /// Like [`BufferRing::consumer_start_batch`], but also returns (possibly
    /// short) at `deadline`.
    pub fn consumer_start_batch_until(
        &self,
        deadline: Instant,
        n_min: usize,
        n_max: usize,
    ) -> Result<ConsumerBatch<'_>> {
        if n_min > self.capacity {
            return Err(Error::BacklogMisuse(format!(
                "consumer requested {} bytes, capacity is {} bytes",
                n_min, self.capacity
            )));
        }
        let mut st = self.state.lock();
        while st.count < n_min && !st.eof {
            if self.not_empty.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        Ok(self.batch_locked(&st, n_max))
    }

    /// Release `n` bytes previously observed via a consumer batch.
    /// `n` must not exceed the observed batch length.
    pub fn consumer_commit_batch(&self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut st = self.state.lock();
        if n > st.count {
            return Err(Error::BacklogMisuse(format!(
                "consumer freed {} bytes, only {} available",
                n, st.count
            )));
        }
        st.head = (st.head + n) % self.capacity;
        st.count -= n;
        self.not_full.notify_one();
        Ok(())
    }

    fn batch_locked<'a>(&'a self, st: &RingState, n_max: usize) -> ConsumerBatch<'a> {
        let n = st.count.min(n_max);
        if n == 0 {
            return ConsumerBatch::empty();
        }
        let n1 = n.min(self.capacity - st.head);
        let n2 = n - n1;
        // SAFETY: [head, head + n) is the occupied region (modulo wrap);
        // the producer never writes there until the consumer commits.
        let seg1 = unsafe { self.data.add(st.head) } as *const u8;
        let seg2 = self.data as *const u8;
        ConsumerBatch {
            seg: [(seg1, n1), (seg2, n2)],
            n,
            _ring: PhantomData,
        }
    }

    /// Append bytes at the tail. Caller must hold the lock and have
    /// verified room.
    fn put_locked(&self, st: &mut RingState, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        debug_assert!(self.capacity - st.count >= bytes.len());
        let n1 = bytes.len().min(self.capacity - st.tail);
        // SAFETY: the free region [tail, tail + n1) lies inside the
        // allocation and does not overlap `bytes`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.add(st.tail), n1);
        }
        st.tail = (st.tail + n1) % self.capacity;
        let rem = bytes.len() - n1;
        if rem > 0 {
            // Wrapped; `tail` is now zero.
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr().add(n1), self.data.add(st.tail), rem);
            }
            st.tail = (st.tail + rem) % self.capacity;
        }
        st.count += bytes.len();
    }

    fn publish_stats(&self, st: &RingState) {
        *self.shared_stats.lock() = st.stats.clone();
    }
}

/// A view of 0, 1, or 2 contiguous readable regions of the ring
///
/// Two regions appear when the occupied bytes wrap the end of the ring
/// storage. The view stays valid until the consumer commits bytes back to
/// the ring.
pub struct ConsumerBatch<'a> {
    seg: [(*const u8, usize); 2],
    /// Total readable bytes across both segments
    pub n: usize,
    _ring: PhantomData<&'a BufferRing>,
}

impl<'a> ConsumerBatch<'a> {
    fn empty() -> Self {
        ConsumerBatch {
            seg: [(ptr::null(), 0), (ptr::null(), 0)],
            n: 0,
            _ring: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// The readable regions in consumption order. The second slice is
    /// empty unless the batch wraps.
    pub fn slices(&self) -> (&'a [u8], &'a [u8]) {
        // SAFETY: each segment pointer/length pair describes an initialized
        // region of the ring that only this consumer may observe until it
        // commits (see module docs).
        let a = match self.seg[0] {
            (_, 0) => &[][..],
            (p, len) => unsafe { std::slice::from_raw_parts(p, len) },
        };
        let b = match self.seg[1] {
            (_, 0) => &[][..],
            (p, len) => unsafe { std::slice::from_raw_parts(p, len) },
        };
        (a, b)
    }

    /// Copy `dst.len()` bytes off the front of the view and logically
    /// remove them. Used to peel the length prefix before a send.
    pub fn copy_and_remove(&mut self, dst: &mut [u8]) {
        debug_assert!(dst.len() <= self.n);
        let mut copied = 0;
        while copied < dst.len() {
            let (p, len) = self.seg[0];
            let take = (dst.len() - copied).min(len);
            // SAFETY: `take <= len`, both regions are valid, and `dst`
            // cannot alias ring storage.
            unsafe {
                ptr::copy_nonoverlapping(p, dst.as_mut_ptr().add(copied), take);
            }
            copied += take;
            if take == len {
                self.seg[0] = self.seg[1];
                self.seg[1] = (ptr::null(), 0);
            } else {
                // SAFETY: `take < len`, so the advanced pointer stays in
                // the segment.
                self.seg[0] = (unsafe { p.add(take) }, len - take);
            }
        }
        self.n -= dst.len();
    }

    /// A sub-view of the first `n_max` bytes, preserving segmentation.
    pub fn limit(&self, n_max: usize) -> ConsumerBatch<'a> {
        let n = self.n.min(n_max);
        let n1 = n.min(self.seg[0].1);
        let n2 = n - n1;
        ConsumerBatch {
            seg: [(self.seg[0].0, n1), (self.seg[1].0, n2)],
            n,
            _ring: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn ring(capacity: usize) -> (Arc<BufferRing>, Arc<Mutex<RingStats>>) {
        let stats = Arc::new(Mutex::new(RingStats::default()));
        (
            Arc::new(BufferRing::new(capacity, Arc::clone(&stats))),
            stats,
        )
    }

    fn drain(batch: &ConsumerBatch<'_>) -> Vec<u8> {
        let (a, b) = batch.slices();
        let mut out = a.to_vec();
        out.extend_from_slice(b);
        out
    }

    #[test]
    fn test_commit_and_consume_one_datagram() {
        let (ring, stats) = ring(64);
        ring.producer_commit_batch(&[MsgRef::data(b"ABC")]).unwrap();

        let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
        assert_eq!(batch.n, 7);
        assert_eq!(drain(&batch), b"\x00\x00\x00\x03ABC");
        ring.consumer_commit_batch(7).unwrap();

        let s = stats.lock().clone();
        assert_eq!(s.n_datagrams, 1);
        assert_eq!(s.n_datagram_bytes, 3);
        assert_eq!(s.first_datagram_size, 3);
        assert_eq!(s.min_datagram_size, 3);
        assert_eq!(s.max_datagram_size, 3);
    }

    #[test]
    fn test_zero_length_datagram() {
        let (ring, _) = ring(64);
        ring.producer_commit_batch(&[MsgRef::data(b"")]).unwrap();
        let batch = ring.consumer_start_batch(4, usize::MAX).unwrap();
        assert_eq!(drain(&batch), b"\x00\x00\x00\x00");
    }

    #[test]
    fn test_wraparound_produces_two_slices() {
        let (ring, _) = ring(16);
        // Fill 12 bytes, drain them, then commit again so the next frame
        // wraps the end of the 16-byte storage.
        ring.producer_commit_batch(&[MsgRef::data(&[0xAA; 8])]).unwrap();
        let batch = ring.consumer_start_batch(12, usize::MAX).unwrap();
        assert_eq!(batch.n, 12);
        ring.consumer_commit_batch(12).unwrap();

        ring.producer_commit_batch(&[MsgRef::data(&[0xBB; 8])]).unwrap();
        let batch = ring.consumer_start_batch(12, usize::MAX).unwrap();
        assert_eq!(batch.n, 12);
        let (a, b) = batch.slices();
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 8);
        assert_eq!(drain(&batch), {
            let mut v = vec![0, 0, 0, 8];
            v.extend_from_slice(&[0xBB; 8]);
            v
        });
        ring.consumer_commit_batch(12).unwrap();
    }

    #[test]
    fn test_copy_and_remove_across_wrap() {
        let (ring, _) = ring(16);
        ring.producer_commit_batch(&[MsgRef::data(&[1; 10])]).unwrap();
        let batch = ring.consumer_start_batch(14, usize::MAX).unwrap();
        ring.consumer_commit_batch(14).unwrap();
        drop(batch);

        // Prefix now straddles the wrap point (tail at 14 of 16).
        ring.producer_commit_batch(&[MsgRef::data(&[2; 6])]).unwrap();
        let mut batch = ring.consumer_start_batch(10, usize::MAX).unwrap();
        let mut prefix = [0u8; 4];
        batch.copy_and_remove(&mut prefix);
        assert_eq!(u32::from_be_bytes(prefix), 6);
        assert_eq!(batch.n, 6);
        assert_eq!(drain(&batch), [2; 6]);
        ring.consumer_commit_batch(10).unwrap();
    }

    #[test]
    fn test_limit_preserves_segmentation() {
        let (ring, _) = ring(64);
        ring.producer_commit_batch(&[MsgRef::data(b"hello"), MsgRef::data(b"world")])
            .unwrap();
        let batch = ring.consumer_start_batch(18, usize::MAX).unwrap();
        let view = batch.limit(9);
        assert_eq!(view.n, 9);
        assert_eq!(drain(&view), b"\x00\x00\x00\x05hello");
    }

    #[test]
    fn test_discarded_messages_are_counted_not_stored() {
        let (ring, stats) = ring(64);
        ring.producer_commit_batch(&[
            MsgRef {
                payload: b"junk",
                kind: MsgKind::Truncated,
            },
            MsgRef::data(b"ok"),
            MsgRef {
                payload: b"oob",
                kind: MsgKind::Ancillary,
            },
        ])
        .unwrap();

        let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
        assert_eq!(drain(&batch), b"\x00\x00\x00\x02ok");

        let s = stats.lock().clone();
        assert_eq!(s.n_datagrams, 1);
        assert_eq!(s.n_datagrams_discarded, 2);
    }

    #[test]
    fn test_payload_too_large_is_fatal() {
        let (ring, _) = ring(16);
        let result = ring.producer_commit_batch(&[MsgRef::data(&[0; 13])]);
        assert!(matches!(
            result,
            Err(Error::PayloadTooLarge { len: 13, capacity: 16 })
        ));
        // 12 + 4 == capacity still fits.
        ring.producer_commit_batch(&[MsgRef::data(&[0; 12])]).unwrap();
    }

    #[test]
    fn test_write_after_eof_is_fatal() {
        let (ring, _) = ring(64);
        ring.producer_set_eof();
        assert!(matches!(
            ring.producer_commit_batch(&[MsgRef::data(b"x")]),
            Err(Error::BacklogMisuse(_))
        ));
        assert!(matches!(
            ring.producer_reserve(1),
            Err(Error::BacklogMisuse(_))
        ));
    }

    #[test]
    fn test_set_eof_is_idempotent() {
        let (ring, _) = ring(64);
        ring.producer_set_eof();
        ring.producer_set_eof();
        assert!(ring.is_eof());
    }

    #[test]
    fn test_overcommit_is_fatal() {
        let (ring, _) = ring(64);
        ring.producer_commit_batch(&[MsgRef::data(b"abc")]).unwrap();
        assert!(matches!(
            ring.consumer_commit_batch(8),
            Err(Error::BacklogMisuse(_))
        ));
    }

    #[test]
    fn test_consumer_returns_short_only_on_eof() {
        let (ring, _) = ring(64);
        ring.producer_commit_batch(&[MsgRef::data(b"ab")]).unwrap();
        ring.producer_set_eof();
        let batch = ring.consumer_start_batch(100000, usize::MAX);
        assert!(matches!(batch, Err(Error::BacklogMisuse(_))));
        let batch = ring.consumer_start_batch(10, usize::MAX).unwrap();
        assert_eq!(batch.n, 6);
    }

    #[test]
    fn test_reserve_reports_free_bytes() {
        let (ring, _) = ring(64);
        assert_eq!(ring.capacity(), 64);
        assert_eq!(ring.producer_reserve(1).unwrap(), 64);
        ring.producer_commit_batch(&[MsgRef::data(&[7; 20])]).unwrap();
        assert_eq!(ring.producer_reserve(10).unwrap(), 40);
        ring.consumer_commit_batch(24).unwrap();
        // n_min is clamped to capacity, so this cannot wait forever.
        assert_eq!(ring.producer_reserve(usize::MAX).unwrap(), 64);
    }

    #[test]
    fn test_timed_consume_returns_empty_on_timeout() {
        let (ring, _) = ring(64);
        let deadline = Instant::now() + Duration::from_millis(20);
        let batch = ring
            .consumer_start_batch_until(deadline, 1, usize::MAX)
            .unwrap();
        assert!(batch.is_empty());
        assert!(!ring.is_eof());
    }

    #[test]
    fn test_timed_commit_gives_up_when_full() {
        let (ring, _) = ring(16);
        ring.producer_commit_batch(&[MsgRef::data(&[0; 12])]).unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let committed = ring
            .producer_commit_batch_until(&[MsgRef::data(&[1; 8])], deadline)
            .unwrap();
        assert_eq!(committed, 0);
    }

    #[test]
    fn test_timed_reserve_may_return_short() {
        let (ring, _) = ring(16);
        ring.producer_commit_batch(&[MsgRef::data(&[0; 10])]).unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let free = ring.producer_reserve_until(deadline, 10).unwrap();
        assert_eq!(free, 2);
    }

    #[test]
    fn test_fifo_conservation_across_threads() {
        let (ring, stats) = ring(256);
        let n_datagrams = 2000usize;

        let producer_ring = Arc::clone(&ring);
        let producer = thread::spawn(move || {
            let mut payload = Vec::new();
            for i in 0..n_datagrams {
                payload.clear();
                payload.extend_from_slice(&(i as u32).to_be_bytes());
                payload.resize(4 + (i % 40), (i % 251) as u8);
                producer_ring
                    .producer_commit_batch(&[MsgRef::data(&payload)])
                    .unwrap();
            }
            producer_ring.producer_set_eof();
        });

        // Consumer re-parses frames from arbitrary batch boundaries.
        let mut received = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
            if batch.is_empty() {
                assert!(ring.is_eof());
                break;
            }
            let (a, b) = batch.slices();
            pending.extend_from_slice(a);
            pending.extend_from_slice(b);
            ring.consumer_commit_batch(batch.n).unwrap();
            while pending.len() >= 4 {
                let len = u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]])
                    as usize;
                if pending.len() < 4 + len {
                    break;
                }
                received.push(pending[4..4 + len].to_vec());
                pending.drain(..4 + len);
            }
        }
        producer.join().unwrap();

        assert!(pending.is_empty());
        assert_eq!(received.len(), n_datagrams);
        for (i, payload) in received.iter().enumerate() {
            assert_eq!(&payload[..4], &(i as u32).to_be_bytes());
            assert_eq!(payload.len(), 4 + (i % 40));
        }

        let s = stats.lock().clone();
        assert_eq!(s.n_datagrams, n_datagrams as u64);
        assert_eq!(s.n_datagrams_discarded, 0);
        assert!(s.max_backlog_bytes <= 256);
    }
}
