//! # Tracker Relay Library
//!
//! Core of the `tracker-relay` application. The relay acquires multi-station
//! pose records from a motion tracker and forwards them in real time to a log,
//! a remote message consumer and a dynamic signal-mapping network, while a
//! remote peer starts, stops and queries it over UDP.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: The Device API (`TrackerBackend`, `TrackerDevice`), record
//!   types, and the simulated tracker.
//! - **`network`**: Typed messages, the `MessageTransport` trait with UDP and
//!   in-memory implementations, and the `Router`/`Listener` pair for inbound
//!   commands.
//! - **`run_state`**: `RunState`, shared between the acquisition loop and the
//!   command listener, and the status it reports.
//! - **`control`**: The command channel handling `start`, `stop` and `status`.
//! - **`session`**: The device session state machine and its retry loop.
//! - **`fanout`**: The per-pass read loop and the log, remote and mapping sinks.
//! - **`config`**: Layered Figment configuration.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: Error types for every layer.

pub mod config;
pub mod control;
pub mod error;
pub mod fanout;
pub mod hardware;
pub mod logging;
pub mod network;
pub mod run_state;
pub mod session;

pub use error::{RelayError, RelayResult};
pub use run_state::{RunState, Status};
