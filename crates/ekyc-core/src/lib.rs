//! # ekyc-core
//!
//! Core building blocks for the eKYC identity-verification engine: the
//! fixed-layout wire codec, the per-shard SPSC ring buffer, shard
//! selection, the user store, the business step, engine counters, and
//! configuration.
//!
//! The runtime that wires these into threads lives in `ekyc-daemon`; this
//! crate stays free of I/O apart from the store.
//!
//! ## Example
//!
//! ```rust
//! use ekyc_core::codec::{self, FrameFields, FRAME_LEN, MSG_VERIFY_REQUEST};
//!
//! let mut buf = [0u8; FRAME_LEN];
//! codec::encode(
//!     &FrameFields {
//!         msg: MSG_VERIFY_REQUEST,
//!         doc_type: "passport",
//!         id: "A1",
//!         name: "Alice",
//!         date_of_issue: "2020-01-01",
//!         date_of_expiry: "2030-01-01",
//!         address: "1 First Street",
//!         verified: "false",
//!     },
//!     &mut buf,
//! )
//! .unwrap();
//!
//! let frame = codec::decode(&buf).unwrap();
//! assert_eq!(frame.id(), "A1");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod config;
pub mod counters;
pub mod idle;
pub mod kyc;
pub mod ring;
pub mod shard;
pub mod store;

pub use config::EngineConfig;
pub use counters::{CountersSnapshot, EngineCounters};
pub use shard::{ShardId, ShardPolicy, ShardSelector};
pub use store::{SqliteStore, Store, StoreError, UserRecord};
