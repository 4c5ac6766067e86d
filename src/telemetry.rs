//! Telemetry utilities: tracing setup, dispatch timing and span constructors.

use crate::config::{LogFormat, LoggingConfig};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is
/// harmless; the second install is ignored.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match logging.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Guard for timing a dispatch job.
///
/// Records the job duration when dropped, so early returns and session
/// loss are measured too.
pub struct DispatchTimer {
    start: Instant,
}

impl DispatchTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for DispatchTimer {
    fn drop(&mut self) {
        crate::metrics::record_dispatch_duration(self.start.elapsed().as_secs_f64());
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for a session's connect and event pump task.
    pub fn session(user_id: &str) -> Span {
        info_span!("session", user_id = %user_id)
    }

    /// Span for one dispatch job.
    pub fn dispatch(user_id: &str, job_id: &str, recipients: usize) -> Span {
        info_span!("dispatch", user_id = %user_id, job_id = %job_id, recipients)
    }
}
