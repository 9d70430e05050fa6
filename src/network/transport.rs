//! Message transport abstraction and the UDP implementation.
//!
//! A `Destination` is a resolved address. Whoever holds the value owns it, and
//! dropping it releases it, so replacing the relay's remote address with
//! `Option::replace` releases the previous one exactly once.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tracing::debug;

use crate::error::TransportError;
use crate::network::protocol::Message;

/// A resolved message destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    addr: SocketAddr,
}

impl Destination {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "udp://{}", self.addr)
    }
}

/// Typed message send and address resolution.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Fire-and-forget send of one message.
    async fn send(&self, to: &Destination, message: &Message) -> Result<(), TransportError>;

    /// Resolve `host:port` into a destination.
    async fn resolve(&self, host: &str, port: u16) -> Result<Destination, TransportError>;
}

/// Split a destination URL into host and port.
///
/// Accepts `osc.udp://host:port`, `udp://host:port`, `host:port` and bracketed
/// IPv6 hosts (`udp://[::1]:9000`). A trailing path is ignored.
pub fn parse_destination_url(url: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidUrl(url.to_string());

    let rest = match url.split_once("://") {
        Some((scheme, rest)) if scheme == "udp" || scheme == "osc.udp" => rest,
        Some(_) => return Err(invalid()),
        None => url,
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, port) = bracketed.split_once("]:").ok_or_else(invalid)?;
        (host, port)
    } else {
        authority.rsplit_once(':').ok_or_else(invalid)?
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Transport sending one JSON datagram per message from a single UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind the outgoing socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl MessageTransport for UdpTransport {
    async fn send(&self, to: &Destination, message: &Message) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        self.socket.send_to(&bytes, to.addr()).await?;
        Ok(())
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Destination, TransportError> {
        let resolve_error = |reason: String| TransportError::Resolve {
            host: host.to_string(),
            port,
            reason,
        };

        let candidates: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| resolve_error(e.to_string()))?
            .collect();

        // Prefer an address of the same family as the local socket.
        let want_v4 = self
            .socket
            .local_addr()
            .map(|local| local.is_ipv4())
            .unwrap_or(true);
        let chosen = candidates
            .iter()
            .find(|addr| addr.is_ipv4() == want_v4)
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| resolve_error("no addresses found".to_string()))?;

        debug!(host, port, addr = %chosen, "Resolved destination");
        Ok(Destination::new(chosen))
    }
}
