//! Tracing setup for the binary.
//!
//! Logs go to stderr, or to `--log-file`; command results are printed on
//! stdout by the formatters.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log levels from silent to most detailed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum Verbosity {
    Quiet,
    Error,
    #[default]
    Warning,
    Notice,
    Status,
    Verbose,
    Debug,
    Trace,
}

impl Verbosity {
    /// Filter directive used when `RUST_LOG` is unset.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Quiet => "off",
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Notice | Self::Status => "info",
            Self::Verbose | Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

fn build_env_filter(level: Verbosity) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level.directive())
        .with_context(|| format!("invalid log filter {:?}", level.directive()))
}

/// Install the global subscriber.
pub fn init_logging(level: Verbosity, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = build_env_filter(level)?;
    let (file_layer, stderr_layer) = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let layer = fmt::layer().with_writer(Mutex::new(file)).with_ansi(false);
            (Some(layer), None)
        }
        None => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("logging already initialised")
}
