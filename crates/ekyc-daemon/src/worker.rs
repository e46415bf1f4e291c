//! Per-shard worker: dequeue, decode, apply the business step, reply.
//!
//! Each worker owns the consumer side of exactly one ring. Faults never
//! leave the loop: a bad record or a failed store call becomes a counter
//! increment and, where the contract allows, a negative reply. Repeated
//! store failures open a circuit breaker that parks the shard instead of
//! burning CPU against a dead backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ekyc_core::codec::{self, FRAME_LEN};
use ekyc_core::counters::EngineCounters;
use ekyc_core::kyc::{self, Outcome};
use ekyc_core::ring::{ReadAction, SpscRing};
use ekyc_core::shard::ShardId;
use ekyc_core::store::Store;
use tracing::{debug, info, warn};

use crate::transport::Publication;

/// Sleep when the ring is empty but the engine is still running.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Consecutive errors that open the circuit breaker.
const CIRCUIT_BREAKER_THRESHOLD: u32 = 10;

/// How long an open breaker parks the shard.
const CIRCUIT_BREAKER_PAUSE: Duration = Duration::from_secs(5);

/// One shard's worker loop, run on its own thread by the engine.
pub struct ShardWorker {
    shard: ShardId,
    queue: Arc<SpscRing>,
    store: Arc<dyn Store>,
    publication: Arc<dyn Publication>,
    counters: Arc<EngineCounters>,
    running: Arc<AtomicBool>,
    consecutive_errors: u32,
}

impl ShardWorker {
    /// Wires the worker for `shard` over its ring.
    #[must_use]
    pub fn new(
        shard: ShardId,
        queue: Arc<SpscRing>,
        store: Arc<dyn Store>,
        publication: Arc<dyn Publication>,
        counters: Arc<EngineCounters>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shard,
            queue,
            store,
            publication,
            counters,
            running,
            consecutive_errors: 0,
        }
    }

    /// Drains the ring until the engine stops and the ring is empty.
    pub fn run(mut self) {
        info!(shard = self.shard, "worker started");
        loop {
            let queue = Arc::clone(&self.queue);
            let consumed = queue.read(|_, record| {
                self.handle_record(record);
                if self.consecutive_errors > CIRCUIT_BREAKER_THRESHOLD {
                    ReadAction::Stop
                } else {
                    ReadAction::Continue
                }
            });

            if self.consecutive_errors > CIRCUIT_BREAKER_THRESHOLD {
                warn!(
                    shard = self.shard,
                    pause = ?CIRCUIT_BREAKER_PAUSE,
                    "circuit breaker open, parking shard"
                );
                thread::sleep(CIRCUIT_BREAKER_PAUSE);
                self.consecutive_errors = 0;
                continue;
            }

            if consumed == 0 {
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
        }
        info!(shard = self.shard, "worker exiting");
    }

    /// Processes one raw record off the ring.
    fn handle_record(&mut self, record: &[u8]) {
        let frame = match codec::decode(record) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(shard = self.shard, error = %e, "record failed to decode");
                self.counters.incr_errors();
                self.consecutive_errors += 1;
                return;
            }
        };

        let report = kyc::respond(&frame, self.store.as_ref());
        match report.outcome {
            Outcome::Reply(verified) => self.publish_reply(&frame, verified),
            Outcome::AlreadyVerified => self.counters.incr_already_verified(),
            Outcome::Ignored => self.counters.incr_ignored(),
        }

        if report.store_error {
            self.counters.incr_errors();
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }
    }

    /// Encodes and offers the reply frame; a refused offer costs the reply,
    /// never the worker.
    fn publish_reply(&self, frame: &codec::IdentityFrame<'_>, verified: bool) {
        let mut buf = [0u8; FRAME_LEN];
        if let Err(e) = codec::encode(&frame.reply_fields(verified), &mut buf) {
            // Reply fields come from a decoded frame, so every value
            // already fits its slot.
            warn!(shard = self.shard, error = %e, "reply failed to encode");
            self.counters.incr_errors();
            return;
        }

        let result = self.publication.offer(&buf);
        if result.is_success() {
            self.counters.incr_replies_sent();
            debug!(
                shard = self.shard,
                id = frame.id(),
                verified,
                "reply published"
            );
        } else {
            self.counters.incr_replies_failed();
            warn!(
                shard = self.shard,
                id = frame.id(),
                result = %result,
                "reply refused by publication"
            );
        }
    }
}
