use crate::core::config::{ConsoleOutput, LoggingConfig};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Keeps the selected console format visible to the caller.
#[derive(Debug)]
pub struct LoggingGuard {
    console_output: ConsoleOutput,
}

impl LoggingGuard {
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }
}

/// Initialize the tracing subscriber for this process.
///
/// `RUST_LOG` wins over the configured default level. Logs always go
/// to stderr so stdout stays parseable as command output. Errors when
/// invoked more than once per process unless tests reset the guard.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, AppError> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::new(
            ErrorCategory::InternalError,
            "logging already initialized",
        ));
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to configure tracing level: {}", err),
            )
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.console_output {
        ConsoleOutput::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(false)
                    .with_target(false),
            )
            .init(),
        ConsoleOutput::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_target(false),
            )
            .init(),
    }

    Ok(LoggingGuard {
        console_output: config.console_output,
    })
}

#[cfg(test)]
/// Reset the initialization guard so tests can reconfigure logging.
pub fn reset_for_tests() {
    LOGGER_INITIALIZED.store(false, Ordering::SeqCst);
}
