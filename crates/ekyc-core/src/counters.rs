//! Engine-wide event counters.
//!
//! One instance per engine, shared by the ingestor and every worker.
//! Increments are relaxed; snapshot reads use acquire so a reader sees a
//! consistent-enough view for observability. These are in-process tallies,
//! not a metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic tallies of everything the pipeline observed.
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Fragments handed to the ingestor by the transport.
    received: AtomicU64,
    /// Fragments dropped after the ring stayed full for the shard timeout.
    dropped_backpressure: AtomicU64,
    /// Fragments shorter than a frame header, or undecodable records.
    malformed: AtomicU64,
    /// Fragments carrying a template id this engine does not serve.
    unknown_template: AtomicU64,
    /// Business-step and decode failures inside workers.
    errors: AtomicU64,
    /// Replies accepted by the publication.
    replies_sent: AtomicU64,
    /// Replies the publication refused.
    replies_failed: AtomicU64,
    /// Frames arriving with `verified = true`, ignored by design contract.
    already_verified: AtomicU64,
    /// Frames with an unrecognised `msg`, ignored without reply.
    ignored: AtomicU64,
}

impl EngineCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one received fragment.
    pub fn incr_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one fragment dropped to backpressure.
    pub fn incr_dropped_backpressure(&self) {
        self.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one malformed fragment or record.
    pub fn incr_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one fragment with a foreign template id.
    pub fn incr_unknown_template(&self) {
        self.unknown_template.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one worker-side error.
    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one successfully published reply.
    pub fn incr_replies_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one reply the publication refused.
    pub fn incr_replies_failed(&self) {
        self.replies_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one already-verified frame.
    pub fn incr_already_verified(&self) {
        self.already_verified.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one frame ignored for an unknown `msg`.
    pub fn incr_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            received: self.received.load(Ordering::Acquire),
            dropped_backpressure: self.dropped_backpressure.load(Ordering::Acquire),
            malformed: self.malformed.load(Ordering::Acquire),
            unknown_template: self.unknown_template.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            replies_sent: self.replies_sent.load(Ordering::Acquire),
            replies_failed: self.replies_failed.load(Ordering::Acquire),
            already_verified: self.already_verified.load(Ordering::Acquire),
            ignored: self.ignored.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Fragments handed to the ingestor.
    pub received: u64,
    /// Fragments dropped to backpressure.
    pub dropped_backpressure: u64,
    /// Malformed fragments and records.
    pub malformed: u64,
    /// Fragments with a foreign template id.
    pub unknown_template: u64,
    /// Worker-side errors.
    pub errors: u64,
    /// Replies accepted by the publication.
    pub replies_sent: u64,
    /// Replies the publication refused.
    pub replies_failed: u64,
    /// Already-verified frames, ignored.
    pub already_verified: u64,
    /// Unknown-`msg` frames, ignored.
    pub ignored: u64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let counters = EngineCounters::new();
        counters.incr_received();
        counters.incr_received();
        counters.incr_replies_sent();
        counters.incr_errors();

        let snap = counters.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.replies_sent, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.dropped_backpressure, 0);
    }

    #[test]
    fn test_concurrent_increments_all_land() {
        let counters = Arc::new(EngineCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.incr_received();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.snapshot().received, 4000);
    }
}
