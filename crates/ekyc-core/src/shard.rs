//! Shard selection for the ingest path.
//!
//! Every inbound frame is assigned to exactly one of N shards, each backed
//! by its own ring and worker thread. Two policies are supported; the
//! engine fixes one at startup and logs the choice.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Index of one shard lane, in `[0, num_shards)`.
pub type ShardId = usize;

/// Low counter bits mixed into the key-affinity hash so bursts of one id
/// still spread over a few shards.
const AFFINITY_COUNTER_BITS: u32 = 0x3;

/// How the ingestor maps frames to shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardPolicy {
    /// Strict rotation over all shards. Highest throughput, no affinity.
    #[default]
    RoundRobin,
    /// Hash of the identity number plus low counter bits. Frames for one
    /// id tend to land on the same shard, preserving per-key ordering.
    KeyAffinity,
}

impl std::fmt::Display for ShardPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::KeyAffinity => write!(f, "key-affinity"),
        }
    }
}

/// Maps frames to shards under the configured policy.
///
/// The counter is atomic so the selector can be driven from whichever
/// thread the transport polls on.
#[derive(Debug)]
pub struct ShardSelector {
    policy: ShardPolicy,
    mask: u32,
    counter: AtomicU32,
}

impl ShardSelector {
    /// Creates a selector over `num_shards` lanes.
    ///
    /// # Panics
    ///
    /// Panics if `num_shards` is not a power of two; configuration
    /// validation rejects that long before a selector exists.
    #[must_use]
    pub fn new(policy: ShardPolicy, num_shards: usize) -> Self {
        assert!(
            num_shards.is_power_of_two(),
            "shard count must be a power of two, got {num_shards}"
        );
        #[allow(clippy::cast_possible_truncation)]
        Self {
            policy,
            mask: num_shards as u32 - 1,
            counter: AtomicU32::new(0),
        }
    }

    /// The policy this selector was built with.
    #[must_use]
    pub const fn policy(&self) -> ShardPolicy {
        self.policy
    }

    /// Picks the shard for a frame whose identity number is `id`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn select(&self, id: &str) -> ShardId {
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        let shard = match self.policy {
            ShardPolicy::RoundRobin => ticket & self.mask,
            ShardPolicy::KeyAffinity => {
                let mut key = Vec::with_capacity(id.len() + 1);
                key.extend_from_slice(id.as_bytes());
                key.push((ticket & AFFINITY_COUNTER_BITS) as u8);
                xxh3_64(&key) as u32 & self.mask
            }
        };
        shard as ShardId
    }
}
