//! Runtime logging setup, grounded on the teacher's `flux::logging::init`.
//!
//! The teacher read a `sloggers::LoggerConfig` out of a hardcoded TOML literal; this crate
//! reads the same shape but from the `MINK_LOG` environment variable (falling back to a plain
//! terminal logger at `info` level) so the three daemon binaries can each pick their own
//! destination without duplicating the parsing.
use lazy_static::lazy_static;
use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

lazy_static! {
    static ref ROOT_LOGGER: Logger = build_default();
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.to_ascii_lowercase().as_str() {
        "critical" => Some(Severity::Critical),
        "error" => Some(Severity::Error),
        "warning" | "warn" => Some(Severity::Warning),
        "info" => Some(Severity::Info),
        "debug" => Some(Severity::Debug),
        "trace" => Some(Severity::Trace),
        _ => None,
    }
}

fn build_default() -> Logger {
    let level = std::env::var("MINK_LOG")
        .ok()
        .and_then(|raw| parse_severity(&raw))
        .unwrap_or(Severity::Info);

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("default terminal logger must build")
}

/// The process-wide root logger, built once on first use.
pub fn root() -> &'static Logger {
    &ROOT_LOGGER
}
