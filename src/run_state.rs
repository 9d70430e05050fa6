//! Shared run state between the acquisition loop and the command channel.
//!
//! `RunState` is created once at startup and shared through an `Arc`. The
//! command channel flips `running` and swaps the remote destination; the
//! session and fan-out engine read them. The device health flags are written
//! only by the acquisition side and are diagnostics for `status` replies, never
//! gates: a reader may see a value one iteration old.
//!
//! The health flags keep `open ⇒ found` and `good ⇒ open`. Setting a flag also
//! sets the flags it implies; clearing one clears the flags that depend on it.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use crate::network::Destination;

/// Relay status reported to remote peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Stopped by a `stop` command or never started
    Waiting,
    DeviceNotFound,
    DeviceFoundButNotOpen,
    DataStreamError,
    /// Records are flowing
    Sending,
}

impl Status {
    /// Derive the status from the raw flags. First matching rule wins.
    pub fn from_flags(running: bool, found: bool, open: bool, good: bool) -> Self {
        if !running {
            Status::Waiting
        } else if !found {
            Status::DeviceNotFound
        } else if !open {
            Status::DeviceFoundButNotOpen
        } else if !good {
            Status::DataStreamError
        } else {
            Status::Sending
        }
    }

    /// Wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Waiting => "waiting",
            Status::DeviceNotFound => "device_not_found",
            Status::DeviceFoundButNotOpen => "device_found_but_not_open",
            Status::DataStreamError => "data_stream_error",
            Status::Sending => "sending",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide relay state.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    device_found: AtomicBool,
    device_open: AtomicBool,
    data_good: AtomicBool,
    remote: Mutex<Option<Destination>>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new(false, None)
    }
}

impl RunState {
    pub fn new(running: bool, remote: Option<Destination>) -> Self {
        Self {
            running: AtomicBool::new(running),
            device_found: AtomicBool::new(false),
            device_open: AtomicBool::new(false),
            data_good: AtomicBool::new(false),
            remote: Mutex::new(remote),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn device_found(&self) -> bool {
        self.device_found.load(Ordering::Relaxed)
    }

    pub fn device_open(&self) -> bool {
        self.device_open.load(Ordering::Relaxed)
    }

    pub fn data_good(&self) -> bool {
        self.data_good.load(Ordering::Relaxed)
    }

    pub fn set_device_found(&self, found: bool) {
        if !found {
            self.set_device_open(false);
        }
        self.device_found.store(found, Ordering::Relaxed);
    }

    pub fn set_device_open(&self, open: bool) {
        if open {
            self.device_found.store(true, Ordering::Relaxed);
        } else {
            self.data_good.store(false, Ordering::Relaxed);
        }
        self.device_open.store(open, Ordering::Relaxed);
    }

    pub fn set_data_good(&self, good: bool) {
        if good {
            self.device_found.store(true, Ordering::Relaxed);
            self.device_open.store(true, Ordering::Relaxed);
        }
        self.data_good.store(good, Ordering::Relaxed);
    }

    /// Snapshot of the current remote destination.
    pub fn remote(&self) -> Option<Destination> {
        self.remote.lock().clone()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.lock().is_some()
    }

    /// Install a new remote destination and return the one it replaced.
    pub fn replace_remote(&self, remote: Destination) -> Option<Destination> {
        self.remote.lock().replace(remote)
    }

    /// Current status as reported to `status` queries.
    pub fn status(&self) -> Status {
        Status::from_flags(
            self.is_running(),
            self.device_found(),
            self.device_open(),
            self.data_good(),
        )
    }

    /// Ask every loop to wind down. Also stops acquisition.
    pub fn request_shutdown(&self) {
        self.set_running(false);
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        loop {
            let notified = self.shutdown_notify.notified();
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}
