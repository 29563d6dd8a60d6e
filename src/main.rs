use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use marqueed::backend::DrmBackend;
use marqueed::command::FrontendAffinity;
use marqueed::config::Config;
use marqueed::control::ControlChannel;
use marqueed::Marqueed;

const USAGE: &str = "\
Usage: marqueed [-f SA|RA|NA] [--config PATH]

Marquee display daemon.

  -f, --frontend  front-end affinity: SA (standalone emulator),
                  RA (peer-controlled), NA (none; default)
      --config    configuration file (default /etc/marqueed.json)
      --version   print version and exit
  -h, --help      print this help and exit";

struct Args {
    affinity: FrontendAffinity,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut affinity = FrontendAffinity::Unset;
    let mut config = None;
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-f" | "--frontend" => {
                let value = argv.next().ok_or("missing value for -f")?;
                affinity = FrontendAffinity::from_flag(&value).ok_or_else(|| {
                    format!("unknown front-end {value:?} (expected SA, RA or NA)")
                })?;
            }
            "--config" => {
                config = Some(PathBuf::from(
                    argv.next().ok_or("missing value for --config")?,
                ));
            }
            "--version" => {
                println!("marqueed {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument {other:?}")),
        }
    }
    Ok(Args { affinity, config })
}

/// Log to the journal when it is reachable (the daemon normally runs as a
/// systemd unit), to stderr otherwise.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marqueed=info"));
    match tracing_journald::layer() {
        Ok(journald) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(journald)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(args.config.as_deref())?;

    if unsafe { libc::geteuid() } != 0 {
        warn!("not running as root; taking DRM master will likely fail");
    }

    marqueed::install_signal_handlers()?;
    let mut channel = ControlChannel::create(config.fifo_path.clone(), config.poll_interval())
        .context("control channel unavailable")?;
    let backend = DrmBackend::open(&config.device_path)
        .with_context(|| format!("opening {}", config.device_path.display()))?;

    let mut daemon = Marqueed::new(config, backend, args.affinity)?;
    daemon.run(&mut channel)?;
    daemon.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("marqueed: {e}\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = run(args) {
        error!("fatal: {e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
