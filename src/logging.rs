//! Tracing setup for the daemon
//!
//! Pass spans and the events inside them use [`PASS_TARGET`], which has its
//! own level (`logging.preparer_log_level`) so a single pass can be traced at
//! `debug` while the rest of the process stays at `log_level`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Target of the `preparer` span and of everything logged by the pass
pub const PASS_TARGET: &str = "transfer_preparer::preparer";

fn rotation(tag: &str) -> Rotation {
    match tag {
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Directives used when `RUST_LOG` is unset
fn filter_directives(config: &LoggingConfig) -> String {
    let pass_level = config
        .preparer_log_level
        .as_deref()
        .unwrap_or(&config.log_level);
    format!(
        "{},{}={},sqlx=warn",
        config.log_level, PASS_TARGET, pass_level
    )
}

/// Install the global subscriber
///
/// JSON goes to the rolling file only; text goes to the file and stdout.
/// Keep the returned guard alive until exit or buffered file output is lost.
pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let json_file = config.use_json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer.clone())
            .with_ansi(false)
    });
    let text_file = (!config.use_json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(writer)
            .with_ansi(false)
    });
    let stdout = (!config.use_json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_file)
        .with(text_file)
        .with(stdout)
        .init();

    guard
}
