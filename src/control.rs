//! Remote control over the message transport.
//!
//! The command channel registers `start`, `stop` and `status` under the
//! configured namespace and mutates the shared [`RunState`] from the listener
//! task while acquisition keeps running.
//!
//! | Path | Signature | Effect |
//! |------|-----------|--------|
//! | `ns/start`  | `i`  | remote = sender host + port, start |
//! | `ns/start`  | `si` | remote = host + port, start |
//! | `ns/start`  | none | restart with the existing remote |
//! | `ns/stop`   | none | stop, keep the remote |
//! | `ns/status` | `i` or `si` | reply `ns/status <status>` |

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{RelayError, TransportError};
use crate::network::{Destination, Message, MessageArg, MessageHandler, MessageTransport, Router};
use crate::run_state::RunState;

/// Where a reply or the data stream should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// The host the command came from, at `port`
    SenderHost { port: u16 },
    /// An explicitly named host
    Explicit { host: String, port: u16 },
}

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start forwarding. `None` re-enables the current remote.
    Start(Option<ReplyTarget>),
    Stop,
    Status(ReplyTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Start,
    Stop,
    Status,
}

impl Verb {
    fn name(&self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Status => "status",
        }
    }
}

fn port_arg(arg: &MessageArg) -> Option<u16> {
    arg.as_int().and_then(|p| u16::try_from(p).ok())
}

fn target_from_args(args: &[MessageArg]) -> Option<ReplyTarget> {
    match args {
        [port] => Some(ReplyTarget::SenderHost {
            port: port_arg(port)?,
        }),
        [host, port] => Some(ReplyTarget::Explicit {
            host: host.as_str()?.to_string(),
            port: port_arg(port)?,
        }),
        _ => None,
    }
}

impl Command {
    fn parse(verb: Verb, args: &[MessageArg]) -> Option<Self> {
        match verb {
            Verb::Start if args.is_empty() => Some(Command::Start(None)),
            Verb::Start => target_from_args(args).map(|t| Command::Start(Some(t))),
            Verb::Stop if args.is_empty() => Some(Command::Stop),
            Verb::Stop => None,
            Verb::Status => target_from_args(args).map(Command::Status),
        }
    }
}

/// Start/stop/status handling bound to one run state.
pub struct CommandChannel {
    state: Arc<RunState>,
    transport: Arc<dyn MessageTransport>,
    namespace: String,
}

impl CommandChannel {
    pub fn new(
        state: Arc<RunState>,
        transport: Arc<dyn MessageTransport>,
        namespace: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into().trim_end_matches('/').to_string();
        Self {
            state,
            transport,
            namespace,
        }
    }

    fn path(&self, verb: &str) -> String {
        format!("{}/{}", self.namespace, verb)
    }

    /// Build the handler table for the listener.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();
        let shapes = [
            (Verb::Start, "i"),
            (Verb::Start, "si"),
            (Verb::Start, ""),
            (Verb::Stop, ""),
            (Verb::Status, "i"),
            (Verb::Status, "si"),
        ];
        for (verb, signature) in shapes {
            router.register(
                self.path(verb.name()),
                signature,
                Arc::new(VerbHandler {
                    channel: Arc::clone(self),
                    verb,
                }),
            );
        }
        router
    }

    /// Apply one command received from `sender`.
    pub async fn execute(&self, sender: SocketAddr, command: Command) {
        match command {
            Command::Start(target) => self.start(sender, target).await,
            Command::Stop => self.stop(),
            Command::Status(target) => self.status(sender, &target).await,
        }
    }

    async fn resolve(
        &self,
        sender: SocketAddr,
        target: &ReplyTarget,
    ) -> Result<Destination, TransportError> {
        match target {
            ReplyTarget::SenderHost { port } => {
                let host = sender.ip().to_canonical().to_string();
                self.transport.resolve(&host, *port).await
            }
            ReplyTarget::Explicit { host, port } => self.transport.resolve(host, *port).await,
        }
    }

    async fn start(&self, sender: SocketAddr, target: Option<ReplyTarget>) {
        let Some(target) = target else {
            if self.state.has_remote() {
                self.state.set_running(true);
                info!(%sender, "Restarted forwarding to the existing remote");
            } else {
                error!(%sender, "Start without address ignored: no remote address is set");
            }
            return;
        };

        match self.resolve(sender, &target).await {
            Ok(dest) => {
                info!(%sender, remote = %dest, "Sending data to new remote");
                // The previous destination is released here.
                drop(self.state.replace_remote(dest));
                self.state.set_running(true);
            }
            Err(e) => {
                let err = RelayError::AddressResolution(e);
                error!(%sender, "Start ignored: {}", err);
            }
        }
    }

    fn stop(&self) {
        self.state.set_running(false);
        info!("Stopped forwarding");
    }

    async fn status(&self, sender: SocketAddr, target: &ReplyTarget) {
        let dest = match self.resolve(sender, target).await {
            Ok(dest) => dest,
            Err(e) => {
                let err = RelayError::AddressResolution(e);
                error!(%sender, "Status query ignored: {}", err);
                return;
            }
        };

        let status = self.state.status();
        let reply = Message::new(self.path("status")).arg(MessageArg::Str(status.to_string()));
        if let Err(e) = self.transport.send(&dest, &reply).await {
            warn!(reply_to = %dest, "Failed to send status reply: {}", e);
        }
    }
}

struct VerbHandler {
    channel: Arc<CommandChannel>,
    verb: Verb,
}

#[async_trait]
impl MessageHandler for VerbHandler {
    async fn handle(&self, sender: SocketAddr, args: &[MessageArg]) {
        match Command::parse(self.verb, args) {
            Some(command) => self.channel.execute(sender, command).await,
            None => warn!(%sender, verb = self.verb.name(), ?args, "Malformed command arguments"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LoopbackTransport;
    use tracing_test::traced_test;

    fn channel(state: Arc<RunState>) -> (Arc<CommandChannel>, LoopbackTransport) {
        let transport = LoopbackTransport::new();
        let channel = Arc::new(CommandChannel::new(
            state,
            Arc::new(transport.clone()),
            "/liberty",
        ));
        (channel, transport)
    }

    fn sender() -> SocketAddr {
        "10.0.0.7:5555".parse().unwrap()
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(Command::parse(Verb::Start, &[]), Some(Command::Start(None)));
        assert_eq!(
            Command::parse(Verb::Start, &[MessageArg::Int(9000)]),
            Some(Command::Start(Some(ReplyTarget::SenderHost { port: 9000 })))
        );
        assert_eq!(
            Command::parse(
                Verb::Status,
                &[MessageArg::Str("h".into()), MessageArg::Int(1)]
            ),
            Some(Command::Status(ReplyTarget::Explicit {
                host: "h".into(),
                port: 1
            }))
        );
        assert_eq!(Command::parse(Verb::Start, &[MessageArg::Int(-1)]), None);
        assert_eq!(Command::parse(Verb::Start, &[MessageArg::Int(70000)]), None);
        assert_eq!(Command::parse(Verb::Stop, &[MessageArg::Int(1)]), None);
    }

    #[test]
    fn test_router_registrations() {
        let (channel, _) = channel(Arc::new(RunState::default()));
        let router = channel.router();
        assert_eq!(router.len(), 6);
        assert!(router.handles("/liberty/start", "si"));
        assert!(router.handles("/liberty/stop", ""));
        assert!(!router.handles("/liberty/status", ""));
    }

    #[tokio::test]
    async fn test_start_with_port_uses_sender_host() {
        let state = Arc::new(RunState::default());
        let (channel, _) = channel(state.clone());

        let mapped: SocketAddr = "[::ffff:10.0.0.7]:5555".parse().unwrap();
        channel
            .execute(
                mapped,
                Command::Start(Some(ReplyTarget::SenderHost { port: 9000 })),
            )
            .await;

        assert!(state.is_running());
        assert_eq!(
            state.remote().map(|d| d.addr()),
            Some("10.0.0.7:9000".parse().unwrap())
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_without_remote_changes_nothing() {
        let state = Arc::new(RunState::default());
        let (channel, _) = channel(state.clone());

        channel.execute(sender(), Command::Start(None)).await;

        assert!(!state.is_running());
        assert!(!state.has_remote());
        assert!(logs_contain("no remote address is set"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_resolution_keeps_previous_remote() {
        let previous = Destination::new("10.0.0.1:9000".parse().unwrap());
        let state = Arc::new(RunState::new(false, Some(previous.clone())));
        let (channel, _) = channel(state.clone());

        channel
            .execute(
                sender(),
                Command::Start(Some(ReplyTarget::Explicit {
                    host: "not a host".into(),
                    port: 9000,
                })),
            )
            .await;

        assert_eq!(state.remote(), Some(previous));
        assert!(!state.is_running());
        assert!(logs_contain("Address resolution failed"));
    }

    #[tokio::test]
    async fn test_status_reply() {
        let state = Arc::new(RunState::new(true, None));
        state.set_device_found(true);
        let (channel, transport) = channel(state);

        channel
            .execute(
                sender(),
                Command::Status(ReplyTarget::SenderHost { port: 7000 }),
            )
            .await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.addr(), "10.0.0.7:7000".parse().unwrap());
        assert_eq!(
            sent[0].1,
            Message::new("/liberty/status")
                .arg(MessageArg::Str("device_found_but_not_open".into()))
        );
    }
}
