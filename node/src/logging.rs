//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` overrides the
//! default filter. Output goes to stderr so stdout stays clean for the
//! `plans` subcommand.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::LogFormat;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "tollgate_node=info,tollgate_core=info,tower_http=info";

/// Initialize the global tracing subscriber. Call once, early in `main()`.
///
/// ```text
/// RUST_LOG=tollgate_core=debug,tower_http=debug tollgate-node run
/// ```
pub fn init_logging(default_filter: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }

    tracing::debug!(?format, "logging initialized");
}
