//! Bounded single-producer single-consumer ring buffer of byte records.
//!
//! One instance sits between the ingestor (producer) and exactly one shard
//! worker (consumer). Records are opaque byte payloads prefixed by an
//! 8-byte record header:
//!
//! ```text
//! +--------------------+--------------------+----------------+---------+
//! | length (i32)       | msg_type (i32)     | payload        | padding |
//! +--------------------+--------------------+----------------+---------+
//! ```
//!
//! `length` covers the header plus payload; each record is padded to an
//! 8-byte boundary. The producer publishes a record with a release store of
//! its length; the consumer observes it with an acquire load, so a reader
//! sees either the whole record or nothing. A record that would cross the
//! end of the backing buffer is preceded by a single padding record
//! (`msg_type` = -1) which the consumer skips; padding bytes never reach a
//! read handler.
//!
//! The consumer zeroes each consumed region before advancing the head, so
//! the producer always claims zeroed space and a zero length reads as
//! "not yet published".

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

/// Length of the per-record header in bytes.
pub const RECORD_HEADER_LEN: usize = 8;

/// Records are padded to this alignment.
pub const RECORD_ALIGNMENT: usize = 8;

/// Record type marking skipped space at the wrap point.
const PADDING_MSG_TYPE: i32 = -1;

/// Control flow returned by a read handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAction {
    /// Keep consuming records.
    Continue,
    /// Stop after this record; unread records stay queued.
    Stop,
}

/// Cache-line padding for the head/tail indices so producer and consumer
/// do not false-share.
#[repr(align(64))]
struct CachePadded<T>(T);

/// Bounded SPSC ring of opaque byte records.
///
/// Safe for exactly one concurrent producer calling [`SpscRing::write`]
/// and one concurrent consumer calling [`SpscRing::read`]; [`SpscRing::size`]
/// may be called from anywhere.
pub struct SpscRing {
    /// Backing storage, allocated as `u64` words so record headers are
    /// naturally aligned for atomic access.
    buf: Box<[UnsafeCell<u64>]>,
    capacity: usize,
    mask: usize,
    max_msg_len: usize,
    /// Consumer position, monotonically increasing.
    head: CachePadded<AtomicUsize>,
    /// Producer position, monotonically increasing.
    tail: CachePadded<AtomicUsize>,
    /// Producer-side cache of the last observed head, refreshed only when
    /// the ring looks full.
    head_cache: CachePadded<AtomicUsize>,
}

// The raw-pointer accesses below are coordinated by the head/tail protocol:
// the producer only writes between tail and head + capacity, the consumer
// only reads between head and tail.
unsafe impl Send for SpscRing {}
unsafe impl Sync for SpscRing {}

impl SpscRing {
    /// Creates a ring with `capacity` bytes of record storage.
    ///
    /// The largest accepted payload is `capacity / 8` bytes, matching the
    /// classic one-to-one ring bound.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is smaller than one
    /// record header.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= RECORD_HEADER_LEN * 2,
            "ring capacity must be a power of two, got {capacity}"
        );
        let words = (0..capacity / 8).map(|_| UnsafeCell::new(0u64)).collect();
        Self {
            buf: words,
            capacity,
            mask: capacity - 1,
            max_msg_len: capacity / 8,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            head_cache: CachePadded(AtomicUsize::new(0)),
        }
    }

    /// Ring capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload `write` accepts.
    #[must_use]
    pub const fn max_msg_len(&self) -> usize {
        self.max_msg_len
    }

    /// Publishes one record; returns `false` when the ring lacks space.
    ///
    /// Producer-side only.
    ///
    /// # Panics
    ///
    /// Panics if `msg_type` is not positive or `src` exceeds
    /// [`SpscRing::max_msg_len`]; both are caller bugs rather than
    /// backpressure.
    pub fn write(&self, msg_type: i32, src: &[u8]) -> bool {
        assert!(msg_type > 0, "record type must be positive, got {msg_type}");
        assert!(
            src.len() <= self.max_msg_len,
            "payload of {} bytes exceeds max message length {}",
            src.len(),
            self.max_msg_len
        );

        let record_len = RECORD_HEADER_LEN + src.len();
        let aligned_len = align_up(record_len);

        let tail = self.tail.0.load(Ordering::Relaxed);
        let Some(claim_index) = self.claim(tail, aligned_len) else {
            return false;
        };

        // Fill the record body before publishing its length.
        unsafe {
            self.write_i32(claim_index + 4, msg_type);
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.base_ptr().add(claim_index + RECORD_HEADER_LEN),
                src.len(),
            );
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        self.length_at(claim_index)
            .store(record_len as i32, Ordering::Release);
        true
    }

    /// Consumes ready records in FIFO order, invoking `handler` for each,
    /// until the ring is empty or the handler returns [`ReadAction::Stop`].
    /// Returns the number of records handed to `handler`.
    ///
    /// Consumer-side only. The payload slice borrows the ring's storage and
    /// is valid only for the duration of the handler call.
    pub fn read<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(i32, &[u8]) -> ReadAction,
    {
        let mut count = 0;
        loop {
            let head = self.head.0.load(Ordering::Relaxed);
            let index = head & self.mask;

            let length = self.length_at(index).load(Ordering::Acquire);
            if length <= 0 {
                break;
            }
            #[allow(clippy::cast_sign_loss)]
            let record_len = length as usize;
            let aligned_len = align_up(record_len);

            let msg_type = unsafe { self.read_i32(index + 4) };
            if msg_type == PADDING_MSG_TYPE {
                self.retire(head, index, aligned_len);
                continue;
            }

            let payload = unsafe {
                std::slice::from_raw_parts(
                    self.base_ptr().add(index + RECORD_HEADER_LEN),
                    record_len - RECORD_HEADER_LEN,
                )
            };
            let action = handler(msg_type, payload);
            self.retire(head, index, aligned_len);
            count += 1;
            if action == ReadAction::Stop {
                break;
            }
        }
        count
    }

    /// Best-effort bytes currently in flight, at most
    /// [`SpscRing::capacity`]. Intended for observability, not control flow.
    #[must_use]
    pub fn size(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.capacity)
    }

    /// Claims `aligned_len` bytes at the producer position, inserting a
    /// padding record when the claim would cross the buffer end. Returns
    /// the buffer index of the claimed record, or `None` when the ring
    /// lacks space.
    fn claim(&self, tail: usize, aligned_len: usize) -> Option<usize> {
        let tail_index = tail & self.mask;
        let to_end = self.capacity - tail_index;
        let needed = if aligned_len > to_end {
            // Padding record to the end, real record from index zero.
            to_end + aligned_len
        } else {
            aligned_len
        };

        let mut head = self.head_cache.0.load(Ordering::Relaxed);
        if tail + needed - head > self.capacity {
            head = self.head.0.load(Ordering::Acquire);
            if tail + needed - head > self.capacity {
                return None;
            }
            self.head_cache.0.store(head, Ordering::Relaxed);
        }

        if aligned_len > to_end {
            unsafe {
                self.write_i32(tail_index + 4, PADDING_MSG_TYPE);
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            self.length_at(tail_index)
                .store(to_end as i32, Ordering::Release);
            self.tail.0.store(tail + to_end + aligned_len, Ordering::Relaxed);
            Some(0)
        } else {
            self.tail.0.store(tail + aligned_len, Ordering::Relaxed);
            Some(tail_index)
        }
    }

    /// Zeroes a consumed record region and advances the head past it.
    ///
    /// The zeroing hands the producer back pre-cleared space, and the
    /// release store of the head orders it before any reuse.
    fn retire(&self, head: usize, index: usize, aligned_len: usize) {
        unsafe {
            std::ptr::write_bytes(self.base_ptr().add(index), 0, aligned_len);
        }
        self.head.0.store(head + aligned_len, Ordering::Release);
    }

    /// Byte pointer to the start of the backing storage.
    ///
    /// `UnsafeCell<u64>` is `repr(transparent)`, so the word array is
    /// addressable as plain bytes.
    fn base_ptr(&self) -> *mut u8 {
        self.buf.as_ptr() as *mut u8
    }

    /// Atomic view of the record length field at `index`.
    ///
    /// `index` is always record-aligned, so the address is suitably aligned
    /// for an `i32` atomic.
    fn length_at(&self, index: usize) -> &AtomicI32 {
        debug_assert_eq!(index % RECORD_ALIGNMENT, 0);
        unsafe { &*self.base_ptr().add(index).cast::<AtomicI32>() }
    }

    /// Plain `i32` access for the non-synchronizing header word.
    unsafe fn write_i32(&self, offset: usize, value: i32) {
        debug_assert_eq!(offset % 4, 0);
        unsafe {
            self.base_ptr().add(offset).cast::<i32>().write(value);
        }
    }

    /// Plain `i32` read for the non-synchronizing header word.
    unsafe fn read_i32(&self, offset: usize) -> i32 {
        debug_assert_eq!(offset % 4, 0);
        unsafe { self.base_ptr().add(offset).cast::<i32>().read() }
    }
}

/// Rounds `len` up to the record alignment.
const fn align_up(len: usize) -> usize {
    (len + RECORD_ALIGNMENT - 1) & !(RECORD_ALIGNMENT - 1)
}
