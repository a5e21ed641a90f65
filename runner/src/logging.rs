//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter is taken from `--log-level` if given, otherwise from the `SIMSWEEP_LOG`
//! environment variable (same syntax as `RUST_LOG`), falling back to `info`.
//! Logs go to stderr, stdout is reserved for the dry-run output.

use thiserror::Error;
use tracing_subscriber::{filter::ParseError, EnvFilter};

pub const LOG_ENV: &str = "SIMSWEEP_LOG";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("Failed to install logger: {0}")]
    Init(String),
}

pub fn init_logging(directive: Option<&str>) -> Result<(), LoggingError> {
    let filter = filter(directive, std::env::var(LOG_ENV).ok().as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| LoggingError::Init(error.to_string()))
}

/// `directive` wins over the value of the environment variable, `info` is the fallback
fn filter(directive: Option<&str>, env: Option<&str>) -> Result<EnvFilter, LoggingError> {
    Ok(match directive.or(env) {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::new("info"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    fn level(directive: Option<&str>, env: Option<&str>) -> Option<LevelFilter> {
        filter(directive, env).unwrap().max_level_hint()
    }

    #[test]
    fn command_line_directive_wins() {
        assert_eq!(level(Some("debug"), Some("warn")), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn environment_and_fallback() {
        assert_eq!(level(None, Some("warn")), Some(LevelFilter::WARN));
        assert_eq!(level(None, None), Some(LevelFilter::INFO));
    }

    #[test]
    fn invalid_directives_are_reported() {
        assert!(matches!(
            filter(Some("simsweep_runner=loud"), None),
            Err(LoggingError::Filter(_))
        ));
        assert!(matches!(
            init_logging(Some("simsweep_runner=loud")),
            Err(LoggingError::Filter(_))
        ));
    }
}
