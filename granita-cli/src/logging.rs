//! Logging bootstrap for the granita CLI.
//!
//! The driver decides format and level from its own command line rather
//! than an environment protocol: `--log-format` switches between
//! human-readable and JSON events, and repeated `-v` flags raise the level
//! for the granita crates while dependencies stay at `warn`. An explicit
//! `RUST_LOG` overrides the assembled filter entirely, so operators can
//! still scope diagnostics however they need. Events go to stderr; stdout
//! stays reserved for the command summary.

use std::{env, fmt, sync::OnceLock};

use clap::ValueEnum;
use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates raised to the requested verbosity; everything else stays quiet.
const VERBOSE_TARGETS: [&str; 3] = ["granita_cli", "granita_core", "granita_providers_volume"];

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Output format for diagnostic events.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Human,
    /// One JSON object per event, for log shippers.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Human => "human",
            Self::Json => "json",
        })
    }
}

/// Logging choices carried over from the parsed command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LogOptions {
    /// Output format for diagnostics.
    pub format: LogFormat,
    /// Number of `-v` flags on the command line.
    pub verbosity: u8,
}

impl LogOptions {
    fn level(self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Filter directives: the granita crates at the requested level, every
    /// dependency at `warn`.
    fn directives(self) -> String {
        let level = self.level();
        let mut directives = String::from("warn");
        for target in VERBOSE_TARGETS {
            directives.push(',');
            directives.push_str(target);
            directives.push('=');
            directives.push_str(level);
        }
        directives
    }
}

/// Errors raised while initialising structured logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A filter directive string was rejected by the subscriber.
    #[error("invalid log filter `{directives}`: {source}")]
    Filter {
        /// The rejected directive string.
        directives: String,
        /// Error raised by `tracing_subscriber`.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    /// Failed to install the global tracing subscriber.
    #[error("failed to install tracing subscriber: {source}")]
    Install {
        /// Error raised by `tracing_subscriber`.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Installs global structured logging according to `options`, once per
/// process. A `RUST_LOG` value takes precedence over the assembled filter;
/// if another collector already owns the global dispatcher (a test harness,
/// an embedding application) it is left in place.
///
/// # Errors
/// Returns [`LoggingError::Filter`] when a `RUST_LOG` override cannot be
/// parsed.
pub fn init_logging(options: &LogOptions) -> Result<(), LoggingError> {
    if INITIALISED.get().is_some() {
        return Ok(());
    }

    match install_subscriber(options) {
        Ok(()) | Err(LoggingError::Install { .. }) => {}
        Err(err) => return Err(err),
    }
    let _ = INITIALISED.set(());
    Ok(())
}

fn install_subscriber(options: &LogOptions) -> Result<(), LoggingError> {
    let filter = match env::var("RUST_LOG") {
        Ok(custom) if !custom.trim().is_empty() => {
            EnvFilter::try_new(&custom).map_err(|source| LoggingError::Filter {
                directives: custom,
                source,
            })?
        }
        _ => {
            let directives = options.directives();
            EnvFilter::try_new(&directives).map_err(|source| LoggingError::Filter {
                directives,
                source,
            })?
        }
    };

    let event_layer = match options.format {
        LogFormat::Human => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed(),
    };

    // Best effort: another logger may already own the log facade.
    let _ = LogTracer::init();

    tracing_subscriber::registry()
        .with(filter)
        .with(event_layer)
        .try_init()
        .map_err(|source| LoggingError::Install { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(0, "info")]
    #[case(1, "debug")]
    #[case(2, "trace")]
    #[case(7, "trace")]
    fn verbosity_maps_onto_levels(#[case] verbosity: u8, #[case] expected: &str) {
        let options = LogOptions {
            verbosity,
            ..LogOptions::default()
        };
        assert_eq!(options.level(), expected);
    }

    #[test]
    fn directives_raise_granita_crates_and_quieten_dependencies() {
        let directives = LogOptions {
            verbosity: 1,
            ..LogOptions::default()
        }
        .directives();
        assert!(directives.starts_with("warn,"));
        for target in VERBOSE_TARGETS {
            assert!(
                directives.contains(&format!("{target}=debug")),
                "missing directive for {target} in `{directives}`"
            );
        }
        EnvFilter::try_new(&directives).expect("assembled directives must parse");
    }

    #[test]
    fn log_formats_render_their_flag_values() {
        assert_eq!(LogFormat::Human.to_string(), "human");
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn repeated_initialisation_is_a_no_op() {
        let options = LogOptions::default();
        init_logging(&options).expect("first call must succeed");
        let louder = LogOptions {
            verbosity: 3,
            format: LogFormat::Json,
        };
        init_logging(&louder).expect("later calls must be no-ops");
    }
}
