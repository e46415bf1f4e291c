//! # ekyc-daemon
//!
//! Runtime wiring for the eKYC identity-verification engine: the transport
//! seam, the ingest thread, the per-shard workers and the engine lifecycle
//! that owns them all.
//!
//! The pure building blocks (codec, ring, store, business step) live in
//! `ekyc-core`; this crate turns them into `1 + N` long-running threads:
//!
//! ```text
//! transport -> ingestor -> ring[i] -> worker[i] -> store
//!                                         |
//!                                         +-> transport (reply)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod engine;
pub mod ingestor;
pub mod logging;
pub mod transport;
pub mod worker;

pub use engine::{Engine, EngineError, EngineState};
