//! drm-planes - move an overlay plane around a KMS display
//!
//! Needs DRM master on the card, so run it from a text VT with no
//! compositor active.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drm_planes::input::{RawTerminal, ReaderKeys};
use drm_planes::{modeset, Config, DrmDevice, Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "drm-planes")]
#[command(about = "Compose dumb buffers on DRM hardware planes", long_about = None)]
struct Args {
    /// DRM card node (overrides the config file)
    #[arg(short = 'D', long)]
    device: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(short, long)]
    debug: bool,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Full-screen base plane plus a movable overlay (default)
    Planes,
    /// One full-screen buffer through SET_CRTC and a page flip
    Single {
        /// Seconds to keep the buffer on screen
        #[arg(long)]
        hold_secs: Option<u64>,
    },
}

fn init_logging(args: &Args) -> Option<WorkerGuard> {
    let default_filter = if args.debug {
        "debug,drm_planes=debug"
    } else {
        "warn,drm_planes=info"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "drm-planes.log"));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn run(args: &Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    match config.to_toml() {
        Ok(text) => debug!("Effective configuration:\n{}", text),
        Err(e) => debug!("Could not render configuration: {}", e),
    }

    let device = DrmDevice::open(&config.device)?;

    match args.command.unwrap_or(Mode::Planes) {
        Mode::Planes => {
            let _raw = RawTerminal::stdin();
            let mut keys = ReaderKeys::stdin();
            Session::new(SessionConfig::from(&config)).run(device, &mut keys)?;
        }
        Mode::Single { hold_secs } => {
            let hold = Duration::from_secs(hold_secs.unwrap_or(config.hold_secs));
            modeset::show_single(&device, config.single_color, hold)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_logging(&args);

    info!("drm-planes starting");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<drm_planes::Error>()
                .map_or(1, drm_planes::Error::exit_code);
            ExitCode::from(code)
        }
    }
}
