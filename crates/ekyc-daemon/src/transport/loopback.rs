//! In-process loopback transport.
//!
//! Fragments travel over plain channels keyed by `(channel, stream_id)`.
//! Used by the integration tests and by single-process local runs where
//! the request producer and the engine share an address space.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use ekyc_core::config::ChannelBinding;

use super::{OfferResult, Publication, Subscription, Transport, TransportError};

type StreamKey = (String, u32);

/// One direction of a loopback stream.
struct Stream {
    tx: Sender<Vec<u8>>,
    /// Present until a subscriber claims it.
    rx: Option<Receiver<Vec<u8>>>,
}

/// In-process pub/sub bus.
///
/// Cloning the transport (via [`Arc`]) shares the stream registry, so a
/// test can publish requests into the same bus the engine subscribes on.
#[derive(Default)]
pub struct LoopbackTransport {
    streams: Mutex<HashMap<StreamKey, Stream>>,
}

impl LoopbackTransport {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_streams(
        &self,
        channel: &str,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<StreamKey, Stream>>, TransportError> {
        self.streams.lock().map_err(|_| TransportError::Bind {
            channel: channel.to_string(),
            reason: "stream registry poisoned".to_string(),
        })
    }
}

impl Transport for LoopbackTransport {
    fn subscribe(&self, binding: &ChannelBinding) -> Result<Box<dyn Subscription>, TransportError> {
        let key = (binding.channel.clone(), binding.stream_id);
        let mut streams = self.lock_streams(&binding.channel)?;
        let stream = streams.entry(key).or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            Stream { tx, rx: Some(rx) }
        });
        let rx = stream
            .rx
            .take()
            .ok_or_else(|| TransportError::AlreadySubscribed(binding.channel.clone()))?;
        Ok(Box::new(LoopbackSubscription { rx }))
    }

    fn publication(
        &self,
        binding: &ChannelBinding,
    ) -> Result<Arc<dyn Publication>, TransportError> {
        let key = (binding.channel.clone(), binding.stream_id);
        let mut streams = self.lock_streams(&binding.channel)?;
        let tx = streams
            .entry(key)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel();
                Stream { tx, rx: Some(rx) }
            })
            .tx
            .clone();
        Ok(Arc::new(LoopbackPublication { tx }))
    }
}

struct LoopbackSubscription {
    rx: Receiver<Vec<u8>>,
}

impl Subscription for LoopbackSubscription {
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), fragment_limit: usize) -> usize {
        let mut delivered = 0;
        while delivered < fragment_limit {
            match self.rx.try_recv() {
                Ok(fragment) => {
                    handler(&fragment);
                    delivered += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }
}

struct LoopbackPublication {
    tx: Sender<Vec<u8>>,
}

impl Publication for LoopbackPublication {
    fn offer(&self, frame: &[u8]) -> OfferResult {
        match self.tx.send(frame.to_vec()) {
            Ok(()) => OfferResult::Success,
            Err(_) => OfferResult::Closed,
        }
    }

    fn is_connected(&self) -> bool {
        true
    }
}
