//! Prometheus metrics collection for relayd.
//!
//! Exposed on the optional metrics listener (see [`crate::http::run_metrics_server`]).
//!
//! - `relayd_live_sessions` - Sessions held by the registry
//! - `relayd_session_transitions_total{to}` - State transitions by target state
//! - `relayd_send_attempts_total` - Individual send attempts, retries included
//! - `relayd_messages_{sent,failed,lost}_total` - Final per-recipient outcomes
//! - `relayd_dispatch_duration_seconds` - Wall time of whole dispatch jobs
//! - `relayd_sessions_reaped_total` - Sessions destroyed for inactivity
//! - `relayd_handle_close_timeouts_total` - Client handles that failed to close in time
//! - `relayd_jobs_rejected_total{code}` - Dispatch jobs refused before sending

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{Once, OnceLock};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

static INIT: Once = Once::new();

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Session state transitions, labelled by target state.
pub static TRANSITIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Send attempts issued to client handles (retries included).
pub static SEND_ATTEMPTS: OnceLock<IntCounter> = OnceLock::new();

/// Recipients whose message was delivered.
pub static MESSAGES_SENT: OnceLock<IntCounter> = OnceLock::new();

/// Recipients whose attempts were exhausted.
pub static MESSAGES_FAILED: OnceLock<IntCounter> = OnceLock::new();

/// Recipients abandoned because the session left Ready.
pub static MESSAGES_LOST: OnceLock<IntCounter> = OnceLock::new();

/// Sessions destroyed by the idle reaper.
pub static SESSIONS_REAPED: OnceLock<IntCounter> = OnceLock::new();

/// Client handle closes that exceeded the close timeout.
pub static CLOSE_TIMEOUTS: OnceLock<IntCounter> = OnceLock::new();

/// Dispatch jobs rejected before any send, by error code.
pub static JOBS_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges / Histograms
// ========================================================================

/// Sessions currently held by the registry.
pub static LIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

/// Dispatch job duration in seconds, pacing included.
pub static DISPATCH_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Idempotent. Recording before `init` is a no-op.
pub fn init() {
    INIT.call_once(|| {
        let r = registry();

        macro_rules! register {
            ($metric:ident, $init:expr) => {
                match $init {
                    Ok(m) => {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                    }
                }
            };
        }

        register!(TRANSITIONS, IntCounterVec::new(Opts::new("relayd_session_transitions_total", "Session state transitions by target state"), &["to"]));
        register!(SEND_ATTEMPTS, IntCounter::new("relayd_send_attempts_total", "Send attempts issued to client handles"));
        register!(MESSAGES_SENT, IntCounter::new("relayd_messages_sent_total", "Recipients delivered"));
        register!(MESSAGES_FAILED, IntCounter::new("relayd_messages_failed_total", "Recipients that exhausted their attempts"));
        register!(MESSAGES_LOST, IntCounter::new("relayd_messages_lost_total", "Recipients abandoned after session loss"));
        register!(SESSIONS_REAPED, IntCounter::new("relayd_sessions_reaped_total", "Sessions destroyed for inactivity"));
        register!(CLOSE_TIMEOUTS, IntCounter::new("relayd_handle_close_timeouts_total", "Client handle closes that timed out"));
        register!(JOBS_REJECTED, IntCounterVec::new(Opts::new("relayd_jobs_rejected_total", "Dispatch jobs rejected by error code"), &["code"]));
        register!(LIVE_SESSIONS, IntGauge::new("relayd_live_sessions", "Sessions held by the registry"));
        register!(DISPATCH_DURATION, Histogram::with_opts(
            HistogramOpts::new("relayd_dispatch_duration_seconds", "Dispatch job duration")
                .buckets(vec![0.01, 0.1, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0])));
    });
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for metric updates
// ============================================================================

#[inline]
fn inc(metric: &OnceLock<IntCounter>) {
    if let Some(c) = metric.get() {
        c.inc();
    }
}

#[inline]
pub fn set_live_sessions(count: usize) {
    if let Some(g) = LIVE_SESSIONS.get() {
        g.set(count as i64);
    }
}

/// Record a session entering `to`.
#[inline]
pub fn record_transition(to: &str) {
    if let Some(c) = TRANSITIONS.get() {
        c.with_label_values(&[to]).inc();
    }
}

#[inline]
pub fn record_attempt() {
    inc(&SEND_ATTEMPTS);
}

#[inline]
pub fn record_sent() {
    inc(&MESSAGES_SENT);
}

#[inline]
pub fn record_failed() {
    inc(&MESSAGES_FAILED);
}

/// Record recipients abandoned after session loss.
#[inline]
pub fn record_lost(count: usize) {
    if let Some(c) = MESSAGES_LOST.get() {
        c.inc_by(count as u64);
    }
}

#[inline]
pub fn record_reaped() {
    inc(&SESSIONS_REAPED);
}

#[inline]
pub fn record_close_timeout() {
    inc(&CLOSE_TIMEOUTS);
}

/// Record a dispatch job refused before sending.
#[inline]
pub fn record_rejected(code: &str) {
    if let Some(c) = JOBS_REJECTED.get() {
        c.with_label_values(&[code]).inc();
    }
}

#[inline]
pub fn record_dispatch_duration(duration_secs: f64) {
    if let Some(h) = DISPATCH_DURATION.get() {
        h.observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();
        init();

        record_transition("ready");
        record_attempt();
        record_rejected("invalid_state");
        record_dispatch_duration(0.5);

        let output = gather_metrics();
        assert!(output.contains("relayd_session_transitions_total"));
        assert!(output.contains("relayd_jobs_rejected_total"));
        assert!(output.contains("relayd_dispatch_duration_seconds"));
    }
}
