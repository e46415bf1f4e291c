//! Ingest thread: drain the transport, classify, pick a shard, enqueue.
//!
//! A single ingestor owns the subscription and the producer side of every
//! shard ring, which is what keeps each ring single-producer. Fragments
//! that fail pre-validation never reach a ring; a ring that stays full for
//! the shard timeout costs the fragment, never the thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ekyc_core::codec::{self, FrameHeader, FRAME_LEN, HEADER_LEN, TEMPLATE_ID};
use ekyc_core::counters::EngineCounters;
use ekyc_core::idle::BackoffIdleStrategy;
use ekyc_core::ring::SpscRing;
use ekyc_core::shard::ShardSelector;
use tracing::{debug, info, warn};

use crate::transport::Subscription;

/// Record type identity frames carry inside the shard rings.
pub const IDENTITY_RECORD_TYPE: i32 = 1;

/// Fragments drained per poll call.
const POLL_FRAGMENT_LIMIT: usize = 10;

/// Sleep between polls that delivered nothing.
const POLL_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Everything the fragment handler needs besides the subscription itself.
struct IngestContext {
    queues: Vec<Arc<SpscRing>>,
    selector: Arc<ShardSelector>,
    counters: Arc<EngineCounters>,
    shard_timeout: Duration,
    idle_spins: u32,
    idle_yields: u32,
}

/// The ingest loop, run on its own thread by the engine.
pub struct Ingestor {
    subscription: Box<dyn Subscription>,
    running: Arc<AtomicBool>,
    ctx: IngestContext,
}

impl Ingestor {
    /// Wires an ingestor over the given subscription and shard rings.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscription: Box<dyn Subscription>,
        queues: Vec<Arc<SpscRing>>,
        selector: Arc<ShardSelector>,
        counters: Arc<EngineCounters>,
        running: Arc<AtomicBool>,
        shard_timeout: Duration,
        idle_spins: u32,
        idle_yields: u32,
    ) -> Self {
        Self {
            subscription,
            running,
            ctx: IngestContext {
                queues,
                selector,
                counters,
                shard_timeout,
                idle_spins,
                idle_yields,
            },
        }
    }

    /// Polls until the running flag clears.
    pub fn run(self) {
        let Self {
            mut subscription,
            running,
            ctx,
        } = self;
        info!(policy = %ctx.selector.policy(), "ingestor started");

        while running.load(Ordering::Acquire) {
            let polled =
                subscription.poll(&mut |fragment| ctx.handle_fragment(fragment), POLL_FRAGMENT_LIMIT);
            if polled == 0 {
                thread::sleep(POLL_IDLE_SLEEP);
            }
        }
        info!("ingestor exiting");
    }
}

impl IngestContext {
    /// Validates one fragment and enqueues it onto its shard.
    fn handle_fragment(&self, fragment: &[u8]) {
        self.counters.incr_received();

        if fragment.len() < HEADER_LEN {
            self.counters.incr_malformed();
            debug!(len = fragment.len(), "fragment shorter than a header");
            return;
        }
        // Oversized fragments can never be valid frames, and the rings
        // refuse payloads past their record bound.
        if fragment.len() > FRAME_LEN {
            self.counters.incr_malformed();
            debug!(len = fragment.len(), "fragment longer than a frame");
            return;
        }
        let header = match FrameHeader::read(fragment) {
            Ok(header) => header,
            Err(e) => {
                self.counters.incr_malformed();
                debug!(error = %e, "unreadable fragment header");
                return;
            }
        };
        if header.template_id != TEMPLATE_ID {
            self.counters.incr_unknown_template();
            debug!(template_id = header.template_id, "foreign template dropped");
            return;
        }

        let shard = self.selector.select(codec::peek_id(fragment));
        if self.enqueue(shard, fragment) {
            debug!(shard, len = fragment.len(), "fragment enqueued");
        } else {
            self.counters.incr_dropped_backpressure();
            warn!(
                shard,
                timeout = ?self.shard_timeout,
                "ring full past timeout, fragment dropped"
            );
        }
    }

    /// Writes with backoff until accepted or the shard timeout expires.
    fn enqueue(&self, shard: usize, fragment: &[u8]) -> bool {
        let ring = &self.queues[shard];
        if ring.write(IDENTITY_RECORD_TYPE, fragment) {
            return true;
        }

        let mut idle = BackoffIdleStrategy::new(self.idle_spins, self.idle_yields);
        let deadline = Instant::now() + self.shard_timeout;
        loop {
            idle.idle();
            if ring.write(IDENTITY_RECORD_TYPE, fragment) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }
}
