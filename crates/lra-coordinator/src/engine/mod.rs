//! The saga state machine.
//!
//! The engine is the only writer of LRA records. Every mutation happens
//! under a per-LRA lock, and at most one dispatch loop runs per LRA at a
//! time, which also linearizes per-participant callback delivery. The drive
//! loop re-reads state after each fan-in round, so a cancel that arrives
//! while complete calls are in flight switches the remaining participants
//! over to compensation without un-doing anyone already Completed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tracing::{debug, error, info};
use url::Url;

use crate::dispatch::{CallbackKind, CallbackRequest, DispatchOutcome, Dispatcher};
use crate::headers::recovery_uri;
use crate::registry::{self, Enlistment};
use crate::store::{LraStore, StoreError};
use crate::types::{LraId, LraRecord, LraStatus, Participant, ParticipantId, ParticipantStatus};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("unknown lra {0}")]
    NotFound(LraId),
    #[error("operation not legal for {lra} in state {status:?}")]
    InvalidState { lra: LraId, status: LraStatus },
    #[error("{0} is no longer accepting enlistments")]
    AlreadyTerminal(LraId),
    #[error("{0} would become its own ancestor")]
    ParentCycle(LraId),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Hands out one async mutex per LRA id.
#[derive(Default)]
struct LockRegistry {
    inner: parking_lot::Mutex<HashMap<LraId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    fn for_id(&self, id: &LraId) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.lock().entry(id.clone()).or_default().clone()
    }

    fn forget(&self, id: &LraId) {
        self.inner.lock().remove(id);
    }
}

/// What one pass over an LRA found to do.
enum Round {
    /// Nothing to drive (unknown id, Active, or already terminal).
    Idle,
    /// Every participant settled; the record just went terminal.
    Settled(LraRecord),
    /// These participants need `kind` delivered.
    Dispatch {
        kind: CallbackKind,
        batch: Vec<Participant>,
    },
}

pub struct Coordinator {
    store: Arc<dyn LraStore>,
    dispatcher: Arc<Dispatcher>,
    base: Url,
    /// Serializes read-modify-write cycles per LRA.
    locks: LockRegistry,
    /// Held for a whole drive loop; `try_lock` keeps it to one per LRA.
    drive_locks: LockRegistry,
    this: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn LraStore>, dispatcher: Arc<Dispatcher>, base: Url) -> Arc<Self> {
        Arc::new_cyclic(|this| Coordinator {
            store,
            dispatcher,
            base,
            locks: LockRegistry::default(),
            drive_locks: LockRegistry::default(),
            this: this.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Rebuild a full LRA id from the uuid segment used in API paths.
    pub fn id_from_segment(&self, segment: &str) -> LraId {
        LraId::from_segment(&self.base, segment)
    }

    /// Start a new LRA, optionally nested under `parent`.
    pub async fn start(&self, parent: Option<LraId>) -> Result<LraId, CoordinatorError> {
        if let Some(parent_id) = &parent {
            self.check_ancestry(parent_id).await?;
        }

        let id = LraId::mint(&self.base);
        self.store
            .insert(LraRecord::new(id.clone(), parent.clone()))
            .await?;
        info!(
            lra = %id,
            parent = parent.as_ref().map(|p| p.as_str()),
            "lra started"
        );
        Ok(id)
    }

    /// Nested LRAs form a tree. The parent must exist, and walking its
    /// ancestor chain must terminate without revisiting an id.
    async fn check_ancestry(&self, parent: &LraId) -> Result<(), CoordinatorError> {
        let mut seen = HashSet::new();
        let mut cursor = Some(parent.clone());
        while let Some(id) = cursor {
            if !seen.insert(id.clone()) {
                return Err(CoordinatorError::ParentCycle(id));
            }
            let record = match self.store.get(&id).await? {
                Some(record) => record,
                None => return Err(CoordinatorError::NotFound(id)),
            };
            cursor = record.parent;
        }
        Ok(())
    }

    /// Enlist a participant. Idempotent per callback-URL pair.
    pub async fn enlist(
        &self,
        id: &LraId,
        compensate_url: Url,
        complete_url: Url,
        after_url: Option<Url>,
    ) -> Result<Enlistment, CoordinatorError> {
        let lock = self.locks.for_id(id);
        let _guard = lock.lock().await;

        let mut record = self.load(id).await?;
        let enlistment = registry::enlist(&mut record, compensate_url, complete_url, after_url)
            .map_err(|_| CoordinatorError::AlreadyTerminal(id.clone()))?;

        if enlistment.created {
            record.touch();
            self.store.update(record).await?;
            info!(
                lra = %id,
                participant = %enlistment.participant.id,
                "participant enlisted"
            );
        }
        Ok(enlistment)
    }

    /// Request a close. Legal only while Active.
    pub async fn close(&self, id: &LraId) -> Result<LraStatus, CoordinatorError> {
        self.request_end(id, LraStatus::Closing).await
    }

    /// Request a cancel. Legal while Active, or while Closing as long as no
    /// participant has already Completed.
    pub async fn cancel(&self, id: &LraId) -> Result<LraStatus, CoordinatorError> {
        self.request_end(id, LraStatus::Cancelling).await
    }

    async fn request_end(
        &self,
        id: &LraId,
        target: LraStatus,
    ) -> Result<LraStatus, CoordinatorError> {
        {
            let lock = self.locks.for_id(id);
            let _guard = lock.lock().await;

            let mut record = self.load(id).await?;
            let allowed = match (record.status, target) {
                (LraStatus::Active, _) => true,
                (LraStatus::Closing, LraStatus::Cancelling) => !record.any_completed(),
                _ => false,
            };
            if !allowed {
                return Err(CoordinatorError::InvalidState {
                    lra: id.clone(),
                    status: record.status,
                });
            }

            info!(
                lra = %id,
                from = record.status.as_str(),
                to = target.as_str(),
                "end requested"
            );
            record.status = target;
            record.touch();
            self.store.update(record).await?;
        }

        self.spawn_drive(id.clone());
        Ok(target)
    }

    /// Current record, for status queries.
    pub async fn lookup(&self, id: &LraId) -> Result<LraRecord, CoordinatorError> {
        self.load(id).await
    }

    /// Participants enlisted under an LRA.
    pub async fn list_participants(
        &self,
        id: &LraId,
    ) -> Result<Vec<Participant>, CoordinatorError> {
        Ok(self.load(id).await?.participants)
    }

    /// Run the dispatch loop for `id` on a background task.
    pub fn spawn_drive(&self, id: LraId) {
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move { engine.drive(&id).await });
    }

    /// Deliver whatever the LRA's current intent requires, round by round,
    /// until it settles or nothing is left to do. Re-driving an LRA whose
    /// participants already acknowledged is a no-op, which is what makes
    /// recovery sweeps safe.
    pub async fn drive(&self, id: &LraId) {
        let drive_lock = self.drive_locks.for_id(id);
        let Ok(_drive_guard) = drive_lock.try_lock() else {
            debug!(lra = %id, "dispatch already in flight");
            return;
        };

        loop {
            let round = match self.plan_round(id).await {
                Ok(round) => round,
                Err(e) => {
                    error!(lra = %id, error = %e, "planning dispatch round failed");
                    return;
                }
            };

            let (kind, batch) = match round {
                Round::Idle => return,
                Round::Settled(record) => {
                    self.spawn_after_notifications(record);
                    return;
                }
                Round::Dispatch { kind, batch } => (kind, batch),
            };

            // Fan out one dispatch per participant, then barrier on all of
            // them before touching the record again.
            let outcomes = futures::future::join_all(batch.iter().map(|participant| async move {
                let request = CallbackRequest {
                    kind,
                    lra: id,
                    participant,
                    recovery_uri: recovery_uri(id, participant.id),
                    final_status: None,
                };
                (participant.id, self.dispatcher.dispatch(&request).await)
            }))
            .await;

            if let Err(e) = self.apply_outcomes(id, kind, outcomes).await {
                error!(lra = %id, error = %e, "recording dispatch outcomes failed");
                return;
            }
        }
    }

    /// Under the LRA lock: pick the callback kind from the current intent,
    /// select the participants still needing it, and mark them called. With
    /// nothing left to deliver, settle the record instead.
    async fn plan_round(&self, id: &LraId) -> Result<Round, CoordinatorError> {
        let lock = self.locks.for_id(id);
        let _guard = lock.lock().await;

        let Some(mut record) = self.store.get(id).await? else {
            return Ok(Round::Idle);
        };
        let kind = match record.status {
            LraStatus::Closing => CallbackKind::Complete,
            LraStatus::Cancelling => CallbackKind::Compensate,
            _ => return Ok(Round::Idle),
        };

        let batch: Vec<Participant> = record
            .participants
            .iter()
            .filter(|p| needs_dispatch(kind, p.status))
            .cloned()
            .collect();

        if batch.is_empty() {
            let status = finalize(&mut record, kind);
            self.store.update(record.clone()).await?;
            info!(lra = %id, status = status.as_str(), "lra settled");
            return Ok(Round::Settled(record));
        }

        for participant in &batch {
            if let Some(p) = record.participant_mut(participant.id) {
                p.status = called_status(kind);
            }
        }
        record.touch();
        self.store.update(record).await?;
        Ok(Round::Dispatch { kind, batch })
    }

    async fn apply_outcomes(
        &self,
        id: &LraId,
        kind: CallbackKind,
        outcomes: Vec<(ParticipantId, DispatchOutcome)>,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.for_id(id);
        let _guard = lock.lock().await;

        let Some(mut record) = self.store.get(id).await? else {
            return Ok(());
        };
        for (participant_id, outcome) in outcomes {
            let Some(p) = record.participant_mut(participant_id) else {
                continue;
            };
            p.attempts = outcome.attempts();
            // An acknowledged complete stands even if the LRA has since
            // flipped to Cancelling; the side effect is final.
            p.status = match outcome {
                DispatchOutcome::Acked { .. } => acked_status(kind),
                DispatchOutcome::Gone { .. } | DispatchOutcome::Exhausted { .. } => {
                    failed_status(kind)
                }
            };
        }
        record.touch();
        self.store.update(record).await?;
        Ok(())
    }

    /// Best-effort terminal notifications; failures are logged and dropped.
    fn spawn_after_notifications(&self, record: LraRecord) {
        if !record.participants.iter().any(|p| p.after_url.is_some()) {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let notifications = record
                .participants
                .iter()
                .filter(|p| p.after_url.is_some())
                .map(|participant| {
                    let dispatcher = dispatcher.clone();
                    let request = CallbackRequest {
                        kind: CallbackKind::After,
                        lra: &record.id,
                        participant,
                        recovery_uri: recovery_uri(&record.id, participant.id),
                        final_status: Some(record.status),
                    };
                    async move { dispatcher.notify_after(&request).await }
                });
            futures::future::join_all(notifications).await;
        });
    }

    /// Drop the lock entries for a garbage-collected LRA.
    pub(crate) fn release_locks(&self, id: &LraId) {
        self.locks.forget(id);
        self.drive_locks.forget(id);
    }

    async fn load(&self, id: &LraId) -> Result<LraRecord, CoordinatorError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))
    }
}

fn needs_dispatch(kind: CallbackKind, status: ParticipantStatus) -> bool {
    match kind {
        CallbackKind::Complete => matches!(
            status,
            ParticipantStatus::Active | ParticipantStatus::CompleteCalled
        ),
        // A participant stuck in CompleteCalled never acknowledged its
        // complete, so a cancel still compensates it. Completed is excluded:
        // that side effect is final.
        CallbackKind::Compensate => matches!(
            status,
            ParticipantStatus::Active
                | ParticipantStatus::CompleteCalled
                | ParticipantStatus::CompensateCalled
        ),
        CallbackKind::After => false,
    }
}

fn called_status(kind: CallbackKind) -> ParticipantStatus {
    match kind {
        CallbackKind::Complete => ParticipantStatus::CompleteCalled,
        _ => ParticipantStatus::CompensateCalled,
    }
}

fn acked_status(kind: CallbackKind) -> ParticipantStatus {
    match kind {
        CallbackKind::Complete => ParticipantStatus::Completed,
        _ => ParticipantStatus::Compensated,
    }
}

fn failed_status(kind: CallbackKind) -> ParticipantStatus {
    match kind {
        CallbackKind::Complete => ParticipantStatus::FailedToComplete,
        _ => ParticipantStatus::FailedToCompensate,
    }
}

/// Move a fully-settled record to its terminal state. Closed requires every
/// participant Completed; Cancelled tolerates participants that Completed
/// before the cancel won the race.
fn finalize(record: &mut LraRecord, kind: CallbackKind) -> LraStatus {
    let all_acked = match kind {
        CallbackKind::Complete => record
            .participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Completed),
        _ => record.participants.iter().all(|p| {
            matches!(
                p.status,
                ParticipantStatus::Compensated | ParticipantStatus::Completed
            )
        }),
    };

    let next = match (kind, all_acked) {
        (CallbackKind::Complete, true) => LraStatus::Closed,
        (CallbackKind::Complete, false) => LraStatus::FailedToClose,
        (_, true) => LraStatus::Cancelled,
        (_, false) => LraStatus::FailedToCancel,
    };
    debug_assert!(record.status.can_transition_to(next));

    record.status = next;
    record.ended_at = Some(Utc::now());
    record.touch();
    next
}
