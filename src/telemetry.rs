//! Log output for the demo binary and anything else that wants it.
//!
//! The filter comes from `WEB_OPTIMIZER_LOG`, then `RUST_LOG`, then defaults
//! to `info`. Logs go to stderr so printed results stay clean on stdout.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "WEB_OPTIMIZER_LOG";

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

fn filter() -> Result<EnvFilter, InitError> {
    match std::env::var(LOG_ENV) {
        Ok(raw) if !raw.trim().is_empty() => Ok(EnvFilter::try_new(raw)?),
        _ => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Configures the global tracing subscriber.
///
/// # Errors
/// Fails if called twice, if `WEB_OPTIMIZER_LOG` is not a valid filter, or if
/// another subscriber was installed first.
pub fn init_tracing() -> Result<(), InitError> {
    INITIALISED
        .set(())
        .map_err(|_| InitError::AlreadyInitialised)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    Registry::default()
        .with(filter()?)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_reported() {
        let first = init_tracing();
        assert!(first.is_ok() || matches!(first, Err(InitError::Install(_))));
        assert!(matches!(init_tracing(), Err(InitError::AlreadyInitialised)));
    }
}
