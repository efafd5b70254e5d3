//! Logging initialization.
//!
//! Console output always; daily-rolling file output when a log
//! directory is configured. The filter honors `RUST_LOG` and falls back
//! to the default directive.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "lipsyncd=info,tower_http=warn";

/// Initialize the global tracing subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it
/// alive for the process lifetime.
pub fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(true));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "lipsyncd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set subscriber: {e}")))?;
            Ok(Some(guard))
        }
        None => {
            registry
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set subscriber: {e}")))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_directive_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(DEFAULT_LOG_FILTER.contains("lipsyncd=info"));
    }
}
