//! Sensor relay
//!
//! Watches a sensor and forwards what it sees to a websocket consumer.
//!
//! Usage:
//!   sensor-relay [--config <file>] [--uri <ws uri>] [--debug] vision --frames <dir>
//!   sensor-relay [--config <file>] [--uri <ws uri>] [--debug] scale [--port <port>] [--simulate]

use clap::{Parser, Subcommand};
use sensor_relay::annotation::create_backend;
use sensor_relay::config::RelayConfig;
use sensor_relay::dispatch::codec_for;
use sensor_relay::extractor::{ClassificationExtractor, WeightExtractor, WeightParser};
use sensor_relay::{
    ConfigError, DirectorySampler, Dispatcher, DispatcherHandle, MotionDetector, Pipeline,
    PipelineReport, PollDetector, PolledDevice, PolledSampler, RelayError, SimulatedScale,
    WebSocketTransport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line parameters for the relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Websocket URI payloads are sent to (overrides the configuration)
    #[arg(short, long)]
    uri: Option<String>,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Detect motion in camera frames and report the recognised item
    Vision {
        /// Directory of frames to replay
        #[arg(short, long)]
        frames: Option<PathBuf>,
    },
    /// Poll a serial scale and report weights
    Scale {
        /// Serial port the scale is attached to
        #[arg(short, long)]
        port: Option<String>,

        /// Use a simulated scale instead of a serial port
        #[arg(long, default_value_t = false)]
        simulate: bool,

        /// Seed for the simulated scale
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_vision(
    config: &RelayConfig,
    frames: Option<PathBuf>,
    runtime: &Runtime,
    dispatcher: DispatcherHandle,
    stop: Arc<AtomicBool>,
) -> Result<PipelineReport, RelayError> {
    let dir = frames.or_else(|| config.frames.dir.clone()).ok_or_else(|| {
        ConfigError::Validation("vision mode needs --frames or frames.dir".to_string())
    })?;

    let sampler = DirectorySampler::open(&dir, config.frames.interval(), config.frames.resolution())?;
    info!("Replaying {} frames from {}", sampler.remaining(), dir.display());

    let backend = create_backend(&config.annotation)?;
    info!("Using {} annotation backend", backend.name());
    let extractor = ClassificationExtractor::new(backend, &config.extraction);

    Pipeline::new(
        sampler,
        MotionDetector::new(&config.motion),
        extractor.into(),
        dispatcher,
        runtime.handle().clone(),
        config.extraction.max_in_flight,
    )
    .with_stop_flag(stop)
    .run()
}

fn run_scale<D: PolledDevice>(
    config: &RelayConfig,
    device: D,
    runtime: &Runtime,
    dispatcher: DispatcherHandle,
    stop: Arc<AtomicBool>,
) -> Result<PipelineReport, RelayError> {
    let scale = &config.scale;
    let parser = WeightParser::from_config(scale);
    let sampler = PolledSampler::new(device, scale.request_code, scale.settle(), scale.cadence());

    Pipeline::new(
        sampler,
        PollDetector::new(parser),
        WeightExtractor::new(parser).into(),
        dispatcher,
        runtime.handle().clone(),
        config.extraction.max_in_flight,
    )
    .with_stop_flag(stop)
    .run()
}

#[cfg(feature = "serial")]
fn open_serial(config: &RelayConfig) -> Result<sensor_relay::sampler::SerialScale, RelayError> {
    Ok(sensor_relay::sampler::SerialScale::open(&config.scale)?)
}

#[cfg(not(feature = "serial"))]
fn open_serial(_config: &RelayConfig) -> Result<SimulatedScale, RelayError> {
    Err(ConfigError::Validation(
        "serial support not enabled. Enable the 'serial' feature or pass --simulate".to_string(),
    )
    .into())
}

fn run(args: Args) -> Result<(), RelayError> {
    let mut config = RelayConfig::load(args.config.as_deref())?;
    if let Some(uri) = args.uri {
        config.dispatch.uri = uri;
        config.validate()?;
    }
    if let Mode::Scale {
        port: Some(port), ..
    } = &args.mode
    {
        config.scale.port = port.clone();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RelayError::Runtime)?;

    let (dispatcher, handle) = Dispatcher::new(
        WebSocketTransport::new(config.dispatch.uri.clone())
            .with_connect_timeout(config.dispatch.connect_timeout()),
        codec_for(config.dispatch.codec),
        &config.dispatch,
    );
    let dispatcher_task = runtime.spawn(dispatcher.run());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let outcome = match args.mode {
        Mode::Vision { frames } => run_vision(&config, frames, &runtime, handle, stop),
        Mode::Scale {
            simulate: true,
            seed,
            ..
        } => {
            let device = match seed {
                Some(seed) => SimulatedScale::with_seed(seed),
                None => SimulatedScale::new(),
            };
            run_scale(&config, device, &runtime, handle, stop)
        }
        // the handle is dropped with the closure when the port cannot be opened
        Mode::Scale { .. } => open_serial(&config)
            .and_then(|device| run_scale(&config, device, &runtime, handle, stop)),
    };

    // the dispatcher ends once the last extraction task drops its handle
    let drain_timeout = config.dispatch.drain_timeout();
    let drained = runtime.block_on(async {
        let abort = dispatcher_task.abort_handle();
        match tokio::time::timeout(drain_timeout, dispatcher_task).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                abort.abort();
                None
            }
        }
    });
    match drained {
        Some(Ok(report)) => info!(
            delivered = report.delivered,
            undelivered = report.undelivered,
            "Delivery finished"
        ),
        Some(Err(e)) => error!("Dispatcher task failed: {}", e),
        None => warn!(
            "Queued payloads not delivered within {:?}, abandoning them",
            drain_timeout
        ),
    }

    let report = outcome?;
    info!(
        samples = report.samples,
        events = report.events,
        dropped = report.dropped,
        "Relay stopped"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
