//! Transport seam: the pub/sub surface the engine requires.
//!
//! The engine treats the message bus as a collaborator behind three small
//! traits. A [`Subscription`] yields complete reassembled fragments to a
//! poll handler; a [`Publication`] offers reply frames and reports the
//! transport's disposition without blocking. Two implementations ship:
//! an in-process [`loopback::LoopbackTransport`] used by tests and local
//! runs, and a [`udp::UdpTransport`] datagram bus.

pub mod loopback;
pub mod udp;

use std::sync::Arc;

use ekyc_core::config::ChannelBinding;
use thiserror::Error;

/// Errors raised while creating transport handles.
///
/// These are fatal construction errors: the engine refuses to build
/// without both of its bindings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The channel could not be bound.
    #[error("failed to bind channel {channel}: {reason}")]
    Bind {
        /// The channel string as configured.
        channel: String,
        /// Why the bind failed.
        reason: String,
    },

    /// The channel string is not something this transport understands.
    #[error("unsupported channel: {0}")]
    Unsupported(String),

    /// The channel already has a subscriber.
    #[error("channel {0} is already subscribed")]
    AlreadySubscribed(String),
}

/// Disposition of one `offer` call.
///
/// Mirrors the result set of a publication on a reliable datagram bus;
/// everything except `Success` means the frame was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResult {
    /// The frame was accepted for delivery.
    Success,
    /// No subscriber is connected.
    NotConnected,
    /// The send buffer is full; the frame may be offered again later.
    BackPressured,
    /// The channel was administratively paused.
    AdminAction,
    /// The publication was closed.
    Closed,
    /// The publication reached its position limit.
    MaxPositionExceeded,
}

impl OfferResult {
    /// Whether the frame was accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for OfferResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::NotConnected => write!(f, "not-connected"),
            Self::BackPressured => write!(f, "back-pressured"),
            Self::AdminAction => write!(f, "admin-action"),
            Self::Closed => write!(f, "closed"),
            Self::MaxPositionExceeded => write!(f, "max-position-exceeded"),
        }
    }
}

/// Outbound side of one channel binding.
///
/// Shared across every worker thread; `offer` must tolerate concurrent
/// calls.
pub trait Publication: Send + Sync {
    /// Offers one frame; never blocks.
    fn offer(&self, frame: &[u8]) -> OfferResult;

    /// Whether a subscriber is currently reachable.
    fn is_connected(&self) -> bool;
}

/// Inbound side of one channel binding.
///
/// Owned by the single thread that polls it.
pub trait Subscription: Send {
    /// Invokes `handler` for up to `fragment_limit` complete fragments and
    /// returns how many were delivered.
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), fragment_limit: usize) -> usize;
}

/// Factory for subscriptions and publications on one bus.
pub trait Transport: Send + Sync {
    /// Creates the subscription for `binding`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the channel cannot be bound or is
    /// already subscribed.
    fn subscribe(&self, binding: &ChannelBinding) -> Result<Box<dyn Subscription>, TransportError>;

    /// Creates (or shares) the publication for `binding`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the channel cannot be reached.
    fn publication(&self, binding: &ChannelBinding)
        -> Result<Arc<dyn Publication>, TransportError>;
}
