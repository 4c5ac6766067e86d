//! Idle session reaper.
//!
//! Periodically destroys sessions with no activity for longer than the
//! configured timeout. Sweeps are best-effort: a session touched while the
//! sweep runs is left for the next one.

use super::{DestroyOutcome, SessionManager};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wall-clock source for sweeps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct IdleReaper {
    manager: Arc<SessionManager>,
    period: Duration,
    timeout: Duration,
    clock: Clock,
}

impl IdleReaper {
    pub fn new(manager: Arc<SessionManager>, period: Duration, timeout: Duration) -> Self {
        Self {
            manager,
            period,
            timeout,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock periodic sweeps read `now` from.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run sweeps every `period` until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                period = ?self.period,
                timeout = ?self.timeout,
                "Idle reaper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep_at((self.clock)()).await;
                    }
                }
            }
            debug!("Idle reaper stopped");
        })
    }

    /// Destroy every session idle for longer than the timeout as of `now`.
    ///
    /// Returns the number of sessions destroyed.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let Ok(timeout) = chrono::Duration::from_std(self.timeout) else {
            return 0;
        };
        let Some(cutoff) = now.checked_sub_signed(timeout) else {
            return 0;
        };

        let candidates: Vec<_> = self
            .manager
            .registry()
            .snapshot()
            .into_iter()
            .filter(|s| s.last_activity() < cutoff)
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let outcomes = join_all(candidates.iter().map(|session| async move {
            let outcome = self.manager.destroy_if_idle(session, cutoff).await;
            (session.user_id(), outcome)
        }))
        .await;

        let mut reaped = 0;
        for (user_id, outcome) in outcomes {
            match outcome {
                Some(DestroyOutcome::Destroyed) => {}
                Some(DestroyOutcome::HandleAbandoned(e)) => {
                    warn!(
                        user_id = %user_id,
                        error = %e,
                        "Idle session destroyed, handle abandoned"
                    );
                }
                Some(DestroyOutcome::AlreadyGone) | None => continue,
            }
            reaped += 1;
            crate::metrics::record_reaped();
        }
        if reaped > 0 {
            info!(reaped, "Idle sessions destroyed");
        }
        reaped
    }
}
