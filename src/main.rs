//! CLI Entry Point for tracker-relay
//!
//! Acquires pose records from a motion tracker and relays them to a log file,
//! a remote UDP consumer and the signal mapper.
//!
//! # Usage
//!
//! Print position and Euler angles to stdout:
//! ```bash
//! tracker-relay -P -E -o
//! ```
//!
//! Run as a daemon that a remote peer starts and stops:
//! ```bash
//! tracker-relay -D -P -l 9000 --send osc.udp://localhost:9999
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use tracker_relay::config::{DataConfig, RelayConfig, STDOUT_LOG};
use tracker_relay::control::CommandChannel;
use tracker_relay::error::RelayError;
use tracker_relay::fanout::{FanOut, LogSink, MappingSink, MessageSignalBus, RemoteSink};
use tracker_relay::hardware::{MockBackend, MockTrackerConfig, SampleRate, TrackerBackend};
use tracker_relay::logging;
use tracker_relay::network::{
    parse_destination_url, Destination, Listener, MessageTransport, UdpTransport,
};
use tracker_relay::run_state::RunState;
use tracker_relay::session::DeviceSession;

#[derive(Parser, Debug)]
#[command(name = "tracker-relay", version)]
#[command(about = "Relay motion tracker records to network consumers", long_about = None)]
struct Cli {
    /// Wait indefinitely for the device and retry after failures
    #[arg(short = 'D', long)]
    daemon: bool,

    /// Serial device to use
    #[arg(short = 'd', long, value_name = "DEVICE")]
    device: Option<String>,

    /// Request position data
    #[arg(short = 'P', long)]
    position: bool,

    /// Request Euler angle data
    #[arg(short = 'E', long)]
    euler: bool,

    /// Request timestamp data
    #[arg(short = 'T', long)]
    timestamp: bool,

    /// Write records to stdout, or to a file if a path is given (-o=PATH)
    #[arg(
        short = 'o',
        long,
        value_name = "PATH",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = STDOUT_LOG
    )]
    output: Option<String>,

    /// Write float values as hexadecimal
    #[arg(short = 'H', long)]
    hex: bool,

    /// Destination URL for record messages, e.g. osc.udp://localhost:9999
    #[arg(short = 's', long, value_name = "URL")]
    send: Option<String>,

    /// UDP port on which to listen for start/stop/status commands
    #[arg(short = 'l', long, value_name = "PORT")]
    listen: Option<u16>,

    /// Enable ad-hoc signal mapping
    #[arg(short = 'm', long)]
    mapper: bool,

    /// Destination URL for mapped signal updates
    #[arg(long, value_name = "URL")]
    mapper_destination: Option<String>,

    /// Poll instead of requesting continuous data. The optional period is in
    /// milliseconds; as fast as possible if unspecified (-p=MS)
    #[arg(
        short = 'p',
        long,
        value_name = "MS",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "0"
    )]
    poll: Option<f64>,

    /// Reset the device before starting acquisition (takes 10 seconds)
    #[arg(long)]
    reset: bool,

    /// Print the update rate on stderr
    #[arg(long)]
    show_rate: bool,

    /// Configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Flags override file and environment settings.
    fn apply(&self, config: &mut RelayConfig) {
        config.device.daemon |= self.daemon;
        config.device.reset |= self.reset;
        if let Some(device) = &self.device {
            config.device.name = device.clone();
        }
        if self.poll.is_some() {
            config.device.poll_period_ms = self.poll;
        }
        // Any field flag replaces the configured selection outright.
        if self.position || self.euler || self.timestamp {
            config.data = DataConfig {
                position: self.position,
                euler: self.euler,
                timestamp: self.timestamp,
            };
        }
        if self.output.is_some() {
            config.output.log = self.output.clone();
        }
        config.output.hex |= self.hex;
        config.output.show_rate |= self.show_rate;
        if self.send.is_some() {
            config.network.send = self.send.clone();
        }
        if self.listen.is_some() {
            config.network.listen = self.listen;
        }
        config.mapper.enabled |= self.mapper;
        if self.mapper_destination.is_some() {
            config.mapper.destination = self.mapper_destination.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {} not found", path.display());
            }
            RelayConfig::load_from(path)
        }
        None => RelayConfig::load(),
    }
    .context("Failed to load configuration")?;
    cli.apply(&mut config);

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    run(config).await
}

async fn resolve_url(transport: &dyn MessageTransport, url: &str) -> Result<Destination, RelayError> {
    let (host, port) = parse_destination_url(url)?;
    transport
        .resolve(&host, port)
        .await
        .map_err(RelayError::AddressResolution)
}

fn build_backend(config: &RelayConfig) -> Result<Arc<dyn TrackerBackend>> {
    match config.device.backend.as_str() {
        "simulated" => {
            let rate = SampleRate::from_hz(config.device.rate_hz).unwrap_or(SampleRate::Hz240);
            let device = MockTrackerConfig::new(config.device.name.clone())
                .with_stations(config.device.stations)
                .with_rate(rate);
            info!(device = %config.device.name, "Using simulated tracker");
            Ok(Arc::new(MockBackend::new(device)))
        }
        other => bail!("Unsupported device backend '{}'", other),
    }
}

async fn build_fanout(
    config: &RelayConfig,
    state: Arc<RunState>,
    transport: Arc<dyn MessageTransport>,
) -> Result<FanOut> {
    let mut fanout = FanOut::new(state.clone()).with_rate_display(config.output.show_rate);

    if let Some(target) = &config.output.log {
        let format = config.float_format();
        let sink = if target == STDOUT_LOG {
            LogSink::stdout(format)
        } else {
            LogSink::create(target, format)
                .with_context(|| format!("Failed to open output file {target}"))?
        };
        fanout = fanout.with_sink(Box::new(sink));
    }

    fanout = fanout.with_sink(Box::new(RemoteSink::new(
        state,
        transport.clone(),
        &config.network.namespace,
    )));

    if config.mapper.enabled {
        let url = config
            .mapper
            .destination
            .as_deref()
            .context("Mapper enabled without a destination")?;
        let dest = resolve_url(transport.as_ref(), url).await?;
        info!(alias = %config.mapper.alias, destination = %dest, "Signal mapping enabled");
        let bus = MessageSignalBus::new(transport, dest, &config.mapper.alias);
        fanout = fanout.with_sink(Box::new(MappingSink::new(
            Box::new(bus),
            config.device.max_stations,
        )));
    }

    Ok(fanout)
}

async fn run(config: RelayConfig) -> Result<()> {
    let settings = config.acquisition_settings()?;

    let udp = UdpTransport::bind(("0.0.0.0", 0))
        .await
        .context("Failed to bind UDP socket")?;
    let transport: Arc<dyn MessageTransport> = Arc::new(udp);

    let remote = match &config.network.send {
        Some(url) => {
            let dest = resolve_url(transport.as_ref(), url).await?;
            info!(remote = %dest, "Sending data");
            Some(dest)
        }
        None => None,
    };
    let state = Arc::new(RunState::new(true, remote));

    let listener_task = match config.network.listen {
        Some(port) => {
            let channel = Arc::new(CommandChannel::new(
                state.clone(),
                transport.clone(),
                &config.network.namespace,
            ));
            let listener = Listener::bind((config.network.bind_host.as_str(), port), channel.router())
                .await
                .with_context(|| format!("Failed to listen on port {port}"))?;
            Some(tokio::spawn(listener.run()))
        }
        None => None,
    };

    let fanout = build_fanout(&config, state.clone(), transport.clone()).await?;
    let backend = build_backend(&config)?;
    let mut session = DeviceSession::new(backend, settings, state.clone(), fanout);

    let interrupt = {
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                state.request_shutdown();
            }
        })
    };

    let result = session.run().await;

    interrupt.abort();
    if let Some(task) = listener_task {
        task.abort();
    }

    match result {
        Ok(()) => {
            info!("Relay stopped");
            Ok(())
        }
        Err(e) => {
            error!(stage = e.stage().unwrap_or("run"), "{}", e);
            Err(e.into())
        }
    }
}
