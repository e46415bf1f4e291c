//! Engine lifecycle: construct, start, stop, observe.
//!
//! The engine owns every long-running thread: one ingestor plus one worker
//! per shard. Construction builds all transport and store handles and can
//! fail; after that, faults stay inside the pipeline as counters and log
//! lines. Shutdown is cooperative: a shared flag stops ingestion first,
//! the workers drain their rings, then everything joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ekyc_core::config::{ConfigError, EngineConfig};
use ekyc_core::counters::{CountersSnapshot, EngineCounters};
use ekyc_core::ring::SpscRing;
use ekyc_core::shard::ShardSelector;
use ekyc_core::store::{Store, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::ingestor::Ingestor;
use crate::transport::{Publication, Subscription, Transport, TransportError};
use crate::worker::ShardWorker;

/// How long `stop` waits for the shard rings to drain before joining.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Poll interval while waiting for the rings to drain.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Errors the engine surfaces to its caller.
///
/// Everything here is fatal at construction or a misuse of the lifecycle;
/// runtime faults never propagate out of the threads.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transport handle could not be created.
    #[error("transport construction failed: {0}")]
    Transport(#[from] TransportError),

    /// The store refused an operation during construction or teardown.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An OS thread could not be spawned.
    #[error("failed to spawn {name} thread: {reason}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// A lifecycle operation was called from the wrong state.
    #[error("{operation} is not legal from state {state}")]
    InvalidState {
        /// The operation attempted.
        operation: &'static str,
        /// The state the engine was in.
        state: EngineState,
    },
}

/// Lifecycle states of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, no threads yet.
    Constructed,
    /// Ingestor and workers are live.
    Running,
    /// Stop requested, threads draining.
    Stopping,
    /// All threads joined, store closed.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constructed => write!(f, "constructed"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The sharded request/response engine.
pub struct Engine {
    config: EngineConfig,
    state: EngineState,
    running: Arc<AtomicBool>,
    counters: Arc<EngineCounters>,
    queues: Vec<Arc<SpscRing>>,
    selector: Arc<ShardSelector>,
    store: Arc<dyn Store>,
    publication: Arc<dyn Publication>,
    /// Present until `start` hands it to the ingestor thread.
    subscription: Option<Box<dyn Subscription>>,
    ingestor_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds the engine: validates the config and creates both transport
    /// handles and all shard rings. No threads start here.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the config is invalid or a
    /// transport handle cannot be created; the process should exit
    /// non-zero on that.
    pub fn new(
        config: EngineConfig,
        transport: &dyn Transport,
        store: Arc<dyn Store>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let subscription = transport.subscribe(&config.subscription)?;
        let publication = transport.publication(&config.publication)?;

        let queues = (0..config.num_shards)
            .map(|_| Arc::new(SpscRing::new(config.ring_capacity)))
            .collect();
        let selector = Arc::new(ShardSelector::new(config.shard_policy, config.num_shards));

        Ok(Self {
            config,
            state: EngineState::Constructed,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(EngineCounters::new()),
            queues,
            selector,
            store,
            publication,
            subscription: Some(subscription),
            ingestor_handle: None,
            worker_handles: Vec::new(),
        })
    }

    /// Starts the ingestor and one worker per shard.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless the engine is freshly
    /// constructed, and [`EngineError::Spawn`] if a thread fails to start.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Constructed {
            return Err(EngineError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        let subscription = self.subscription.take().ok_or(EngineError::InvalidState {
            operation: "start",
            state: self.state,
        })?;

        self.running.store(true, Ordering::Release);

        let ingestor = Ingestor::new(
            subscription,
            self.queues.clone(),
            Arc::clone(&self.selector),
            Arc::clone(&self.counters),
            Arc::clone(&self.running),
            self.config.shard_timeout,
            self.config.idle_spins,
            self.config.idle_yields,
        );
        self.ingestor_handle = Some(spawn_named("ekyc-ingestor", move || ingestor.run())?);

        for (shard, queue) in self.queues.iter().enumerate() {
            let worker = ShardWorker::new(
                shard,
                Arc::clone(queue),
                Arc::clone(&self.store),
                Arc::clone(&self.publication),
                Arc::clone(&self.counters),
                Arc::clone(&self.running),
            );
            self.worker_handles
                .push(spawn_named(&format!("ekyc-shard-{shard}"), move || {
                    worker.run();
                })?);
        }

        self.state = EngineState::Running;
        info!(
            shards = self.config.num_shards,
            ring_capacity = self.config.ring_capacity,
            policy = %self.selector.policy(),
            "engine started"
        );
        Ok(())
    }

    /// Stops ingestion, drains the rings, joins every thread and closes
    /// the store. Idempotent; a second call is a no-op.
    pub fn stop(&mut self) {
        match self.state {
            EngineState::Stopped => return,
            EngineState::Constructed => {
                self.close_store();
                self.state = EngineState::Stopped;
                return;
            }
            EngineState::Running | EngineState::Stopping => {}
        }
        self.state = EngineState::Stopping;
        info!("engine stopping");

        // Ingestion first, so the rings only drain from here on.
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.ingestor_handle.take() {
            join_logged("ekyc-ingestor", handle);
        }

        let deadline = Instant::now() + STOP_GRACE;
        while self.queues.iter().any(|queue| queue.size() > 0) {
            if Instant::now() >= deadline {
                let backlog: usize = self.queues.iter().map(|queue| queue.size()).sum();
                warn!(backlog, "grace period elapsed with records in flight");
                break;
            }
            thread::sleep(DRAIN_POLL);
        }

        for (shard, handle) in self.worker_handles.drain(..).enumerate() {
            join_logged(&format!("ekyc-shard-{shard}"), handle);
        }

        self.close_store();
        self.state = EngineState::Stopped;
        info!(counters = ?self.counters.snapshot(), "engine stopped");
    }

    /// Point-in-time view of the engine counters.
    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    fn close_store(&self) {
        if let Err(e) = self.store.close() {
            warn!(error = %e, "store close failed");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns a named thread, mapping the OS failure into an engine error.
fn spawn_named(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, EngineError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| EngineError::Spawn {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

/// Joins a thread, logging instead of propagating a panic.
fn join_logged(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(thread = name, "thread panicked before shutdown");
    }
}

#[cfg(test)]
mod tests {
    use ekyc_core::config::{ChannelBinding, StoreConfig};
    use ekyc_core::store::SqliteStore;

    use super::*;
    use crate::transport::loopback::LoopbackTransport;

    fn test_config() -> EngineConfig {
        EngineConfig {
            num_shards: 2,
            ring_capacity: 16 * 1024,
            shard_timeout: Duration::from_millis(10),
            idle_spins: 10,
            idle_yields: 10,
            shard_policy: ekyc_core::shard::ShardPolicy::RoundRobin,
            subscription: ChannelBinding {
                channel: "requests".to_string(),
                stream_id: 1001,
            },
            publication: ChannelBinding {
                channel: "replies".to_string(),
                stream_id: 1001,
            },
            store: StoreConfig::default(),
            log: ekyc_core::config::LogConfig::default(),
        }
    }

    fn build_engine(transport: &LoopbackTransport) -> Engine {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        Engine::new(test_config(), transport, store).unwrap()
    }

    #[test]
    fn test_lifecycle_constructed_running_stopped() {
        let transport = LoopbackTransport::new();
        let mut engine = build_engine(&transport);
        assert_eq!(engine.state(), EngineState::Constructed);

        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_start_twice_rejected() {
        let transport = LoopbackTransport::new();
        let mut engine = build_engine(&transport);
        engine.start().unwrap();
        assert!(matches!(
            engine.start(),
            Err(EngineError::InvalidState { operation: "start", .. })
        ));
        engine.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let transport = LoopbackTransport::new();
        let mut engine = build_engine(&transport);
        engine.start().unwrap();
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_stop_before_start_closes_cleanly() {
        let transport = LoopbackTransport::new();
        let mut engine = build_engine(&transport);
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let transport = LoopbackTransport::new();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut config = test_config();
        config.num_shards = 3;
        assert!(matches!(
            Engine::new(config, &transport, store),
            Err(EngineError::Config(_))
        ));
    }
}
