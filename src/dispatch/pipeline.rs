//! Sequential, paced, retrying sender.
//!
//! # Cancellation
//!
//! The session is checked before every attempt: it must still be `Ready`
//! and still be the registry's entry for its user. Pauses between
//! recipients end early when the session is lost. An attempt already in
//! flight is never interrupted; it is bounded by the per-attempt timeout.

use super::{DispatchJob, DispatchReport, Outcome, RecipientResult};
use crate::client::{ChatAddress, ClientHandle, Payload};
use crate::error::{ClientError, DispatchError};
use crate::session::SessionManager;
use crate::state::Session;
use crate::telemetry::{DispatchTimer, spans};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

pub struct DispatchPipeline {
    manager: Arc<SessionManager>,
    attempt_timeout: Duration,
}

impl DispatchPipeline {
    pub fn new(manager: Arc<SessionManager>, attempt_timeout: Duration) -> Self {
        Self {
            manager,
            attempt_timeout,
        }
    }

    /// Run a job to completion.
    ///
    /// Fails fast, without sending anything, unless the session is `Ready`.
    /// Otherwise always returns one result per recipient, in input order.
    /// Jobs for the same session run one after another.
    pub async fn dispatch(&self, job: DispatchJob) -> Result<DispatchReport, DispatchError> {
        let session = self.admit(&job).inspect_err(|e| {
            debug!(user_id = %job.user_id, error = %e, "Dispatch rejected");
            crate::metrics::record_rejected(e.error_code());
        })?;

        let job_id = Uuid::new_v4();
        let span = spans::dispatch(&job.user_id, &job_id.to_string(), job.recipients.len());
        self.run(session, job, job_id).instrument(span).await
    }

    fn admit(&self, job: &DispatchJob) -> Result<Arc<Session>, DispatchError> {
        if job.recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }
        let session = self
            .manager
            .session(&job.user_id)
            .ok_or_else(|| DispatchError::NotFound(job.user_id.clone()))?;
        if !session.is_ready() {
            return Err(DispatchError::SessionNotReady {
                state: session.state(),
            });
        }
        Ok(session)
    }

    async fn run(
        &self,
        session: Arc<Session>,
        job: DispatchJob,
        job_id: Uuid,
    ) -> Result<DispatchReport, DispatchError> {
        let _exclusive = session.lock_dispatch().await;

        // Re-check after queueing behind another job.
        let handle = match session.ready_handle() {
            Ok(handle) if self.manager.registry().holds(&session) => handle,
            _ => {
                let e = DispatchError::SessionNotReady {
                    state: session.state(),
                };
                crate::metrics::record_rejected(e.error_code());
                return Err(e);
            }
        };

        let _timer = DispatchTimer::start();
        info!(delay = ?job.delay, max_retries = job.max_retries, "Dispatch started");

        let mut results = Vec::with_capacity(job.recipients.len());
        let mut recipients = job.recipients.into_iter();
        let mut session_lost = false;

        for (index, recipient) in recipients.by_ref().enumerate() {
            if index > 0 {
                self.pause(&session, job.delay).await;
            }

            let result = self
                .deliver(&session, handle.as_ref(), recipient, &job.payload, job.max_retries)
                .await;
            session_lost = result.outcome == Outcome::SessionLost;
            results.push(result);
            if session_lost {
                break;
            }
        }

        if session_lost {
            results.extend(recipients.map(|recipient| RecipientResult {
                recipient,
                outcome: Outcome::SessionLost,
                attempts: 0,
            }));
        }

        let report = DispatchReport {
            job_id,
            results,
            session_lost,
        };
        crate::metrics::record_lost(report.lost());
        if session_lost {
            warn!(
                sent = report.sent(),
                failed = report.failed(),
                lost = report.lost(),
                state = %session.state(),
                "Dispatch aborted, session lost"
            );
        } else {
            info!(
                sent = report.sent(),
                failed = report.failed(),
                "Dispatch finished"
            );
        }
        Ok(report)
    }

    /// Send to one recipient, retrying up to `max_retries` times.
    async fn deliver(
        &self,
        session: &Arc<Session>,
        handle: &dyn ClientHandle,
        recipient: ChatAddress,
        payload: &Payload,
        max_retries: u32,
    ) -> RecipientResult {
        let mut attempts = 0;
        let outcome = loop {
            // Let the session's event pump apply anything the last send triggered.
            tokio::task::yield_now().await;
            if !self.still_ready(session) {
                break Outcome::SessionLost;
            }

            attempts += 1;
            crate::metrics::record_attempt();
            let sent = match tokio::time::timeout(
                self.attempt_timeout,
                handle.send_message(&recipient, payload),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.attempt_timeout)),
            };
            session.touch(Utc::now());

            match sent {
                Ok(()) => {
                    crate::metrics::record_sent();
                    break Outcome::Sent;
                }
                Err(e) if attempts > max_retries => {
                    warn!(to = %recipient, attempts, error = %e, "Giving up on recipient");
                    crate::metrics::record_failed();
                    break Outcome::Failed {
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    debug!(
                        to = %recipient,
                        attempt = attempts,
                        error = %e,
                        "Send failed, retrying"
                    );
                }
            }
        };

        RecipientResult {
            recipient,
            outcome,
            attempts,
        }
    }

    /// Wait `delay`, or less if the session is lost meanwhile.
    async fn pause(&self, session: &Session, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = session.lost() => {}
        }
    }

    fn still_ready(&self, session: &Arc<Session>) -> bool {
        session.is_ready() && self.manager.registry().holds(session)
    }
}
