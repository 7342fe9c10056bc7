//! Participant callback delivery.
//!
//! The dispatcher owns retry and timeout handling for one callback to one
//! participant. Transient failures are retried with doubling backoff; a
//! 404/410 means the participant is gone and is never retried. Fan-out
//! across the participants of an LRA is the engine's job.

mod client;

pub use client::HttpParticipantClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::types::{LraId, LraStatus, Participant};

/// Which callback a dispatch delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Complete,
    Compensate,
    After,
}

impl CallbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackKind::Complete => "complete",
            CallbackKind::Compensate => "compensate",
            CallbackKind::After => "after",
        }
    }
}

/// One callback to deliver.
#[derive(Debug)]
pub struct CallbackRequest<'a> {
    pub kind: CallbackKind,
    pub lra: &'a LraId,
    pub participant: &'a Participant,
    pub recovery_uri: String,
    /// Final LRA status; present only on `After` notifications.
    pub final_status: Option<LraStatus>,
}

/// Outcome of a single callback attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// 2xx response.
    Ack,
    /// 404 or 410: the participant no longer exists to call.
    Gone,
    /// Transport error or unexpected status.
    Failed(String),
    /// The attempt exceeded its deadline.
    Timeout,
}

/// One attempt of one callback. The dispatcher enforces the deadline around
/// the call as well, so implementations that ignore `timeout` still time out.
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    async fn call(&self, request: &CallbackRequest<'_>, timeout: Duration) -> CallOutcome;
}

/// Final outcome of a dispatch, after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acked { attempts: u32 },
    Gone { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl DispatchOutcome {
    pub fn attempts(self) -> u32 {
        match self {
            DispatchOutcome::Acked { attempts }
            | DispatchOutcome::Gone { attempts }
            | DispatchOutcome::Exhausted { attempts } => attempts,
        }
    }

    pub fn acked(self) -> bool {
        matches!(self, DispatchOutcome::Acked { .. })
    }
}

pub struct Dispatcher {
    client: Arc<dyn ParticipantClient>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ParticipantClient>, policy: RetryPolicy) -> Self {
        Dispatcher { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver one callback, retrying transient failures with doubling
    /// backoff until acknowledged, gone, or attempts are exhausted.
    pub async fn dispatch(&self, request: &CallbackRequest<'_>) -> DispatchOutcome {
        let max = u32::from(self.policy.max_attempts.get());
        let mut delay = self.policy.base_delay;

        for attempt in 1..=max {
            match self.attempt(request).await {
                CallOutcome::Ack => {
                    debug!(
                        lra = %request.lra,
                        participant = %request.participant.id,
                        kind = request.kind.as_str(),
                        attempt,
                        "participant acknowledged"
                    );
                    return DispatchOutcome::Acked { attempts: attempt };
                }
                CallOutcome::Gone => {
                    warn!(
                        lra = %request.lra,
                        participant = %request.participant.id,
                        kind = request.kind.as_str(),
                        attempt,
                        "participant gone, not retrying"
                    );
                    return DispatchOutcome::Gone { attempts: attempt };
                }
                CallOutcome::Failed(reason) => {
                    warn!(
                        lra = %request.lra,
                        participant = %request.participant.id,
                        kind = request.kind.as_str(),
                        attempt,
                        %reason,
                        "callback failed"
                    );
                }
                CallOutcome::Timeout => {
                    warn!(
                        lra = %request.lra,
                        participant = %request.participant.id,
                        kind = request.kind.as_str(),
                        attempt,
                        "callback timed out"
                    );
                }
            }

            if attempt < max {
                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(self.policy.max_delay);
            }
        }

        DispatchOutcome::Exhausted { attempts: max }
    }

    /// Fire an `after` notification: single attempt, logged, never retried.
    pub async fn notify_after(&self, request: &CallbackRequest<'_>) {
        match self.attempt(request).await {
            CallOutcome::Ack => {
                info!(
                    lra = %request.lra,
                    participant = %request.participant.id,
                    "after notification delivered"
                );
            }
            outcome => {
                warn!(
                    lra = %request.lra,
                    participant = %request.participant.id,
                    ?outcome,
                    "after notification dropped"
                );
            }
        }
    }

    async fn attempt(&self, request: &CallbackRequest<'_>) -> CallOutcome {
        let deadline = self.policy.request_timeout;
        match tokio::time::timeout(deadline, self.client.call(request, deadline)).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => CallOutcome::Timeout,
        }
    }
}

/// Add up to 10% random jitter so retries from many participants spread out.
fn jittered(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 10;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=spread))
}
