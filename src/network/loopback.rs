//! In-memory transport.
//!
//! Records every sent message instead of putting it on the network, and
//! resolves only IP literals and `localhost`, so tests never depend on DNS.
//! Individual destinations can be marked unreachable to exercise sink error
//! handling.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::error::TransportError;
use crate::network::protocol::Message;
use crate::network::transport::{Destination, MessageTransport};

#[derive(Debug, Default)]
struct LoopbackInner {
    sent: Vec<(Destination, Message)>,
    unreachable: HashSet<Destination>,
}

/// Transport that keeps sent messages in memory.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    inner: Arc<Mutex<LoopbackInner>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `dest` fail.
    pub fn set_unreachable(&self, dest: Destination) {
        self.inner.lock().unreachable.insert(dest);
    }

    /// All messages sent so far, in order.
    pub fn sent(&self) -> Vec<(Destination, Message)> {
        self.inner.lock().sent.clone()
    }

    /// Messages sent to `dest`, in order.
    pub fn sent_to(&self, dest: &Destination) -> Vec<Message> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|(to, _)| to == dest)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Forget recorded messages.
    pub fn clear(&self) {
        self.inner.lock().sent.clear();
    }
}

#[async_trait]
impl MessageTransport for LoopbackTransport {
    async fn send(&self, to: &Destination, message: &Message) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.unreachable.contains(to) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{to} is unreachable"),
            )));
        }
        inner.sent.push((to.clone(), message.clone()));
        Ok(())
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Destination, TransportError> {
        let ip = if host == "localhost" {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.parse::<IpAddr>()
                .map_err(|e| TransportError::Resolve {
                    host: host.to_string(),
                    port,
                    reason: e.to_string(),
                })?
        };
        Ok(Destination::new(SocketAddr::new(ip, port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_filters() {
        let transport = LoopbackTransport::new();
        let a = transport.resolve("10.0.0.1", 9000).await.unwrap();
        let b = transport.resolve("localhost", 9000).await.unwrap();

        transport.send(&a, &Message::new("/a")).await.unwrap();
        transport.send(&b, &Message::new("/b")).await.unwrap();

        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent_to(&b), vec![Message::new("/b")]);
    }

    #[tokio::test]
    async fn test_unreachable_destination() {
        let transport = LoopbackTransport::new();
        let dest = transport.resolve("10.0.0.1", 9000).await.unwrap();
        transport.set_unreachable(dest.clone());
        assert!(transport.send(&dest, &Message::new("/a")).await.is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_rejects_hostnames() {
        let transport = LoopbackTransport::new();
        assert!(matches!(
            transport.resolve("no such host", 1).await,
            Err(TransportError::Resolve { .. })
        ));
    }
}
