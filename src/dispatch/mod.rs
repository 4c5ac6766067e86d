//! Bulk message dispatch.
//!
//! A [`DispatchJob`] sends one payload to an ordered list of recipients
//! through a single `Ready` session, one recipient at a time.

mod pipeline;

pub use pipeline::DispatchPipeline;

use crate::client::{ChatAddress, Payload};
use crate::state::UserId;
use std::time::Duration;
use uuid::Uuid;

/// One bulk-send request.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub user_id: UserId,
    /// Recipients in send order.
    pub recipients: Vec<ChatAddress>,
    pub payload: Payload,
    /// Pause between two recipients. Not applied after the last one.
    pub delay: Duration,
    /// Extra attempts per recipient after the first failure.
    pub max_retries: u32,
}

/// Final outcome for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Failed { reason: String },
    /// Not attempted (or not finished) because the session left `Ready`.
    SessionLost,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed { .. } => "failed",
            Self::SessionLost => "session_lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientResult {
    pub recipient: ChatAddress,
    pub outcome: Outcome,
    pub attempts: u32,
}

/// Per-recipient results of a job, in input order.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub job_id: Uuid,
    pub results: Vec<RecipientResult>,
    /// The session left `Ready` before every recipient was handled.
    pub session_lost: bool,
}

impl DispatchReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn sent(&self) -> usize {
        self.count(|o| *o == Outcome::Sent)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn lost(&self) -> usize {
        self.count(|o| *o == Outcome::SessionLost)
    }
}
