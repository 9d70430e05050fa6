//! Inbound message dispatch.
//!
//! `Router` is a handler table keyed by `(path, type signature)`. `Listener`
//! owns a bound UDP socket, decodes each datagram and hands it to the router
//! together with the sender's address. A message whose path or signature has
//! no registered handler is logged and dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::network::protocol::{Message, MessageArg, MAX_DATAGRAM_SIZE};

/// Receives messages matching one `(path, signature)` registration.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. `args` already match the registered signature.
    async fn handle(&self, sender: SocketAddr, args: &[MessageArg]);
}

/// Handler table keyed by path and type signature.
#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<(String, String), Arc<dyn MessageHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages to `path` whose arguments have type
    /// signature `signature`. A later registration for the same key wins.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        signature: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.handlers
            .insert((path.into(), signature.into()), handler);
    }

    /// Whether a handler exists for this path and signature.
    pub fn handles(&self, path: &str, signature: &str) -> bool {
        self.handlers
            .contains_key(&(path.to_string(), signature.to_string()))
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the matching handler. Returns false when nothing matched.
    pub async fn dispatch(&self, sender: SocketAddr, message: &Message) -> bool {
        let key = (message.path.clone(), message.type_signature());
        match self.handlers.get(&key) {
            Some(handler) => {
                handler.handle(sender, &message.args).await;
                true
            }
            None => false,
        }
    }
}

/// UDP listener feeding a `Router`.
pub struct Listener {
    socket: UdpSocket,
    router: Router,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs, router: Router) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(
            "Command listener on {}",
            socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".into())
        );
        Ok(Self { socket, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and dispatch until the task is aborted.
    pub async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (n, sender) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // ICMP port-unreachable from an earlier reply surfaces here on some platforms
                    error!("Receive error: {}", e);
                    continue;
                }
            };

            let message = match Message::decode(&buf[..n]) {
                Ok(message) => message,
                Err(e) => {
                    warn!(%sender, "Dropping undecodable message: {}", e);
                    continue;
                }
            };

            if !self.router.dispatch(sender, &message).await {
                debug!(
                    %sender,
                    path = %message.path,
                    signature = %message.type_signature(),
                    "No handler registered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        seen: Mutex<Vec<(SocketAddr, Vec<MessageArg>)>>,
    }

    #[async_trait]
    impl MessageHandler for Capture {
        async fn handle(&self, sender: SocketAddr, args: &[MessageArg]) {
            self.seen.lock().push((sender, args.to_vec()));
        }
    }

    fn sender() -> SocketAddr {
        "10.1.1.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_by_path_and_signature() {
        let port_only = Arc::new(Capture::default());
        let host_port = Arc::new(Capture::default());
        let mut router = Router::new();
        router.register("/ns/start", "i", port_only.clone());
        router.register("/ns/start", "si", host_port.clone());

        let msg = Message::new("/ns/start").arg(MessageArg::Int(9000));
        assert!(router.dispatch(sender(), &msg).await);

        let msg = Message::new("/ns/start")
            .arg(MessageArg::Str("10.0.0.9".into()))
            .arg(MessageArg::Int(9000));
        assert!(router.dispatch(sender(), &msg).await);

        assert_eq!(port_only.seen.lock().len(), 1);
        assert_eq!(host_port.seen.lock().len(), 1);
        assert_eq!(port_only.seen.lock()[0].0, sender());
    }

    #[tokio::test]
    async fn test_unmatched_signature_is_dropped() {
        let handler = Arc::new(Capture::default());
        let mut router = Router::new();
        router.register("/ns/start", "i", handler.clone());

        let msg = Message::new("/ns/start").arg(MessageArg::Float(1.0));
        assert!(!router.dispatch(sender(), &msg).await);
        assert!(!router.dispatch(sender(), &Message::new("/ns/other")).await);
        assert!(handler.seen.lock().is_empty());
        assert!(router.handles("/ns/start", "i"));
        assert!(!router.handles("/ns/start", "f"));
    }

    #[tokio::test]
    async fn test_listener_dispatches_datagrams() {
        let handler = Arc::new(Capture::default());
        let mut router = Router::new();
        router.register("/ns/stop", "", handler.clone());

        let listener = Listener::bind("127.0.0.1:0", router).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(listener.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"garbage", addr).await.unwrap();
        let bytes = Message::new("/ns/stop").encode().unwrap();
        client.send_to(&bytes, addr).await.unwrap();

        for _ in 0..100 {
            if !handler.seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        task.abort();

        let seen = handler.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, client.local_addr().unwrap());
    }
}
