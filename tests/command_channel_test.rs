//! Integration tests for the remote command channel
//!
//! Messages are dispatched through the router built by `CommandChannel`, the
//! same path the UDP listener uses, so the registered shapes are covered too.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_test::traced_test;
use tracker_relay::control::CommandChannel;
use tracker_relay::network::{
    Destination, Listener, LoopbackTransport, Message, MessageArg, MessageTransport, Router,
    UdpTransport,
};
use tracker_relay::run_state::RunState;

fn channel(state: Arc<RunState>) -> (Router, LoopbackTransport) {
    let transport = LoopbackTransport::new();
    let channel = Arc::new(CommandChannel::new(
        state,
        Arc::new(transport.clone()),
        "/liberty",
    ));
    (channel.router(), transport)
}

fn sender() -> SocketAddr {
    "192.168.5.20:41000".parse().unwrap()
}

fn start_port(port: i32) -> Message {
    Message::new("/liberty/start").arg(MessageArg::Int(port))
}

fn start_host_port(host: &str, port: i32) -> Message {
    Message::new("/liberty/start")
        .arg(MessageArg::Str(host.to_string()))
        .arg(MessageArg::Int(port))
}

fn dest(addr: &str) -> Destination {
    Destination::new(addr.parse().unwrap())
}

// =============================================================================
// start / stop
// =============================================================================

#[tokio::test]
async fn test_start_port_matches_start_sender_host_port() {
    let by_port = Arc::new(RunState::default());
    let by_host = Arc::new(RunState::default());
    let (router_a, _) = channel(by_port.clone());
    let (router_b, _) = channel(by_host.clone());

    assert!(router_a.dispatch(sender(), &start_port(9000)).await);
    assert!(
        router_b
            .dispatch(sender(), &start_host_port("192.168.5.20", 9000))
            .await
    );

    assert_eq!(by_port.remote(), by_host.remote());
    assert_eq!(by_port.remote(), Some(dest("192.168.5.20:9000")));
    assert!(by_port.is_running() && by_host.is_running());
}

#[tokio::test]
async fn test_ipv4_mapped_sender_is_canonicalised() {
    let state = Arc::new(RunState::default());
    let (router, _) = channel(state.clone());
    let mapped: SocketAddr = "[::ffff:192.168.5.20]:41000".parse().unwrap();

    router.dispatch(mapped, &start_port(9000)).await;

    assert_eq!(state.remote(), Some(dest("192.168.5.20:9000")));
}

#[tokio::test]
async fn test_stop_then_start_reenables_previous_remote() {
    let state = Arc::new(RunState::default());
    let (router, _) = channel(state.clone());

    router.dispatch(sender(), &start_port(9000)).await;
    router
        .dispatch(sender(), &Message::new("/liberty/stop"))
        .await;
    assert!(!state.is_running());
    assert_eq!(state.remote(), Some(dest("192.168.5.20:9000")));

    router
        .dispatch(sender(), &Message::new("/liberty/start"))
        .await;
    assert!(state.is_running());
    assert_eq!(state.remote(), Some(dest("192.168.5.20:9000")));
}

#[tokio::test]
#[traced_test]
async fn test_start_without_remote_fails_cleanly() {
    let state = Arc::new(RunState::default());
    let (router, transport) = channel(state.clone());

    assert!(
        router
            .dispatch(sender(), &Message::new("/liberty/start"))
            .await
    );

    assert!(!state.is_running());
    assert!(state.remote().is_none());
    assert!(transport.sent().is_empty());
    assert!(logs_contain("no remote address is set"));
}

#[tokio::test]
#[traced_test]
async fn test_malformed_host_keeps_previous_remote() {
    let state = Arc::new(RunState::new(true, Some(dest("10.0.0.1:7000"))));
    state.set_running(false);
    let (router, _) = channel(state.clone());

    router
        .dispatch(sender(), &start_host_port("not a host!", 9000))
        .await;

    assert_eq!(state.remote(), Some(dest("10.0.0.1:7000")));
    assert!(!state.is_running());
    assert!(logs_contain("Address resolution failed"));
}

#[tokio::test]
async fn test_start_replaces_remote() {
    let state = Arc::new(RunState::new(true, Some(dest("10.0.0.1:7000"))));
    let (router, _) = channel(state.clone());

    router
        .dispatch(sender(), &start_host_port("10.0.0.2", 7001))
        .await;

    assert_eq!(state.remote(), Some(dest("10.0.0.2:7001")));
}

#[tokio::test]
async fn test_unregistered_shapes_are_ignored() {
    let state = Arc::new(RunState::default());
    let (router, _) = channel(state.clone());

    let float_port = Message::new("/liberty/start").arg(MessageArg::Float(9000.0));
    assert!(!router.dispatch(sender(), &float_port).await);
    assert!(!router.dispatch(sender(), &start_port(9000).arg(MessageArg::Int(1))).await);
    assert!(!router.dispatch(sender(), &Message::new("/other/start")).await);
    assert!(!state.is_running());
}

// =============================================================================
// status
// =============================================================================

#[tokio::test]
async fn test_status_replies_to_sender_host() {
    let state = Arc::new(RunState::new(true, None));
    state.set_data_good(true);
    let (router, transport) = channel(state.clone());

    let query = Message::new("/liberty/status").arg(MessageArg::Int(7000));
    router.dispatch(sender(), &query).await;

    let replies = transport.sent_to(&dest("192.168.5.20:7000"));
    assert_eq!(
        replies,
        vec![Message::new("/liberty/status").arg(MessageArg::Str("sending".into()))]
    );

    state.set_data_good(false);
    let query = Message::new("/liberty/status")
        .arg(MessageArg::Str("10.9.9.9".into()))
        .arg(MessageArg::Int(7001));
    router.dispatch(sender(), &query).await;

    let replies = transport.sent_to(&dest("10.9.9.9:7001"));
    assert_eq!(
        replies[0].args,
        vec![MessageArg::Str("data_stream_error".into())]
    );
}

// =============================================================================
// UDP end to end
// =============================================================================

async fn send_to(socket: &UdpSocket, to: SocketAddr, message: Message) {
    let bytes = message.encode().unwrap();
    socket.send_to(&bytes, to).await.unwrap();
}

async fn recv_message(socket: &UdpSocket) -> Message {
    let mut buf = [0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no reply within timeout")
        .unwrap();
    Message::decode(&buf[..n]).unwrap()
}

#[tokio::test]
async fn test_udp_start_status_stop() {
    let state = Arc::new(RunState::new(false, None));
    let transport: Arc<dyn MessageTransport> =
        Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
    let channel = Arc::new(CommandChannel::new(state.clone(), transport, "/liberty"));
    let listener = Listener::bind("127.0.0.1:0", channel.router()).await.unwrap();
    let listen_addr = listener.local_addr().unwrap();
    let task = tokio::spawn(listener.run());

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_port = i32::from(peer.local_addr().unwrap().port());
    let status = || Message::new("/liberty/status").arg(MessageArg::Int(peer_port));

    send_to(&peer, listen_addr, start_port(peer_port)).await;
    send_to(&peer, listen_addr, status()).await;
    let reply = recv_message(&peer).await;
    assert_eq!(reply.path, "/liberty/status");
    assert_eq!(reply.args, vec![MessageArg::Str("device_not_found".into())]);
    assert_eq!(
        state.remote().map(|d| d.addr()),
        Some(peer.local_addr().unwrap())
    );

    send_to(&peer, listen_addr, Message::new("/liberty/stop")).await;
    send_to(&peer, listen_addr, status()).await;
    let reply = recv_message(&peer).await;
    assert_eq!(reply.args, vec![MessageArg::Str("waiting".into())]);

    task.abort();
}
