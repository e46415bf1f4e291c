//! Unicast UDP datagram transport.
//!
//! One datagram carries one complete fragment: identity frames are 520
//! bytes, well under a single MTU, so no reassembly is required. The
//! channel string is `udp://HOST:PORT` (or bare `HOST:PORT`); the port
//! plays the role of the stream, so the `stream_id` of a binding is
//! carried in configuration but does not select traffic here.

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use ekyc_core::config::ChannelBinding;
use tracing::debug;

use super::{OfferResult, Publication, Subscription, Transport, TransportError};

/// Receive buffer comfortably above the frame size, so an oversized
/// datagram arrives intact and fails frame validation instead of being
/// silently truncated.
const RECV_BUF_LEN: usize = 2048;

/// UDP datagram bus.
#[derive(Debug, Default)]
pub struct UdpTransport;

impl UdpTransport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Resolves a channel string to a socket address.
fn resolve(channel: &str) -> Result<SocketAddr, TransportError> {
    let stripped = channel.strip_prefix("udp://").unwrap_or(channel);
    stripped
        .to_socket_addrs()
        .map_err(|e| TransportError::Bind {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| TransportError::Unsupported(channel.to_string()))
}

impl Transport for UdpTransport {
    fn subscribe(&self, binding: &ChannelBinding) -> Result<Box<dyn Subscription>, TransportError> {
        let addr = resolve(&binding.channel)?;
        let socket = UdpSocket::bind(addr).map_err(|e| TransportError::Bind {
            channel: binding.channel.clone(),
            reason: e.to_string(),
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind {
                channel: binding.channel.clone(),
                reason: e.to_string(),
            })?;
        debug!(channel = %binding.channel, "udp subscription bound");
        Ok(Box::new(UdpSubscription {
            socket,
            buf: vec![0u8; RECV_BUF_LEN],
        }))
    }

    fn publication(
        &self,
        binding: &ChannelBinding,
    ) -> Result<Arc<dyn Publication>, TransportError> {
        let target = resolve(&binding.channel)?;
        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16, 0, 0, 0, 0, 0, 0, 0], 0))
        };
        let socket = UdpSocket::bind(local).map_err(|e| TransportError::Bind {
            channel: binding.channel.clone(),
            reason: e.to_string(),
        })?;
        socket.connect(target).map_err(|e| TransportError::Bind {
            channel: binding.channel.clone(),
            reason: e.to_string(),
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind {
                channel: binding.channel.clone(),
                reason: e.to_string(),
            })?;
        debug!(channel = %binding.channel, "udp publication connected");
        Ok(Arc::new(UdpPublication { socket }))
    }
}

struct UdpSubscription {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl Subscription for UdpSubscription {
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]), fragment_limit: usize) -> usize {
        let mut delivered = 0;
        while delivered < fragment_limit {
            match self.socket.recv(&mut self.buf) {
                Ok(len) => {
                    handler(&self.buf[..len]);
                    delivered += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "udp receive error");
                    break;
                }
            }
        }
        delivered
    }
}

struct UdpPublication {
    socket: UdpSocket,
}

impl Publication for UdpPublication {
    fn offer(&self, frame: &[u8]) -> OfferResult {
        match self.socket.send(frame) {
            Ok(_) => OfferResult::Success,
            Err(e) if e.kind() == ErrorKind::WouldBlock => OfferResult::BackPressured,
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => OfferResult::NotConnected,
            Err(_) => OfferResult::NotConnected,
        }
    }

    fn is_connected(&self) -> bool {
        // Datagram sockets carry no liveness; refusal shows up per send.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(channel: &str) -> ChannelBinding {
        ChannelBinding {
            channel: channel.to_string(),
            stream_id: 1001,
        }
    }

    /// Binds a subscription on an OS-assigned port, then publishes to it.
    fn loop_pair(bus: &UdpTransport) -> (Box<dyn Subscription>, Arc<dyn Publication>) {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let channel = format!("udp://{addr}");
        let sub = bus.subscribe(&binding(&channel)).unwrap();
        let publication = bus.publication(&binding(&channel)).unwrap();
        (sub, publication)
    }

    #[test]
    fn test_datagram_round_trip() {
        let bus = UdpTransport::new();
        let (mut sub, publication) = loop_pair(&bus);

        assert_eq!(publication.offer(b"identity-frame"), OfferResult::Success);

        // Nonblocking receive needs a beat for local delivery.
        let mut seen = Vec::new();
        for _ in 0..100 {
            if sub.poll(&mut |frag| seen.push(frag.to_vec()), 4) > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(seen, vec![b"identity-frame".to_vec()]);
    }

    #[test]
    fn test_bad_channel_is_bind_error() {
        let bus = UdpTransport::new();
        assert!(matches!(
            bus.subscribe(&binding("udp://not-an-endpoint")),
            Err(TransportError::Bind { .. })
        ));
    }

    #[test]
    fn test_poll_on_quiet_channel_returns_zero() {
        let bus = UdpTransport::new();
        let (mut sub, _publication) = loop_pair(&bus);
        assert_eq!(sub.poll(&mut |_| {}, 4), 0);
    }
}
