//! Tracing setup.
//!
//! JSON lines for production-like tiers, plaintext elsewhere. Every module
//! logs under one of [`LOG_TARGETS`]; the filter comes from
//! `EMBED_REDIRECTS_LOG`, then `RUST_LOG`, then [`LogConfig::default_level`].
//!
//! ```no_run
//! use embed_redirects::logging::{init_logging, LogConfig};
//! use embed_redirects::EnvironmentType;
//!
//! init_logging(LogConfig::for_environment(EnvironmentType::Production)).unwrap();
//! ```

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::EnvironmentType;

/// Targets used by this crate's log events.
pub const LOG_TARGETS: [&str; 6] = ["salt", "signer", "redirect", "rewrite", "http", "config"];

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    #[default]
    Plaintext,
}

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Appended to the file at this path
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Level for [`LOG_TARGETS`] when no filter variable is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_environment(EnvironmentType::default())
    }
}

impl LogConfig {
    /// Plaintext at debug level on stderr.
    pub fn development() -> Self {
        LogConfig {
            format: LogFormat::Plaintext,
            output: LogOutput::Stderr,
            default_level: Level::DEBUG,
        }
    }

    /// JSON at info level on stdout.
    pub fn production() -> Self {
        LogConfig {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }

    /// Preset matching a deployment tier.
    pub fn for_environment(environment: EnvironmentType) -> Self {
        if environment.is_production_like() {
            Self::production()
        } else {
            Self::development()
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file: {0}")]
    File(#[from] io::Error),
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("cannot install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter directives used when neither variable is set.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = String::from("warn");
    for target in LOG_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

fn env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    let directives = ["EMBED_REDIRECTS_LOG", "RUST_LOG"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| default_directives(default_level));
    Ok(EnvFilter::try_new(directives)?)
}

fn writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };
    Ok(writer)
}

/// Install the global subscriber. Only the first call succeeds.
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INSTALLED.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    install(config)
}

/// Best-effort setup for tests; repeated calls are ignored.
pub fn init_test_logging() {
    let _ = install(LogConfig {
        output: LogOutput::Stdout,
        ..LogConfig::development()
    });
}

fn install(config: LogConfig) -> Result<(), LoggingError> {
    let filter = env_filter(config.default_level)?;
    let writer = writer(&config.output)?;
    let timer = UtcTime::rfc_3339();

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_current_span(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}
