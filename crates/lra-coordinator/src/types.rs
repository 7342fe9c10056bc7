//! Core data model for Long Running Actions.
//!
//! An LRA owns its enlisted participants; both carry a status enum whose
//! legal transitions are fixed here. The engine is the only writer, so the
//! transition tables double as the authority for what the engine may do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Opaque URI-shaped identifier for an LRA.
///
/// Minted by the coordinator as `{base}/lra/{uuid}` so the id itself tells a
/// participant where the owning coordinator lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LraId(String);

impl LraId {
    /// Mint a fresh id under the coordinator's base URL.
    pub fn mint(base: &Url) -> Self {
        let base = base.as_str().trim_end_matches('/');
        LraId(format!("{}/lra/{}", base, Uuid::new_v4()))
    }

    /// Rebuild the id for a uuid path segment received on the wire.
    pub fn from_segment(base: &Url, segment: &str) -> Self {
        let base = base.as_str().trim_end_matches('/');
        LraId(format!("{}/lra/{}", base, segment))
    }

    /// Wrap an already-complete LRA URI (e.g. from a context header).
    pub fn from_uri(uri: impl Into<String>) -> Self {
        LraId(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one enlistment within an LRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        ParticipantId(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(ParticipantId)
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of an LRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LraStatus {
    /// Accepting enlistments.
    Active,
    /// Close requested; completing participants.
    Closing,
    /// Cancel requested; compensating participants.
    Cancelling,
    /// All participants acknowledged complete.
    Closed,
    /// All participants acknowledged compensate.
    Cancelled,
    /// One or more participants never acknowledged complete.
    FailedToClose,
    /// One or more participants never acknowledged compensate.
    FailedToCancel,
}

impl LraStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LraStatus::Closed
                | LraStatus::Cancelled
                | LraStatus::FailedToClose
                | LraStatus::FailedToCancel
        )
    }

    /// Legal edges of the state machine. Terminal states have no successors.
    pub fn can_transition_to(self, next: LraStatus) -> bool {
        use LraStatus::*;
        matches!(
            (self, next),
            (Active, Closing)
                | (Active, Cancelling)
                | (Closing, Cancelling)
                | (Closing, Closed)
                | (Closing, FailedToClose)
                | (Cancelling, Cancelled)
                | (Cancelling, FailedToCancel)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LraStatus::Active => "Active",
            LraStatus::Closing => "Closing",
            LraStatus::Cancelling => "Cancelling",
            LraStatus::Closed => "Closed",
            LraStatus::Cancelled => "Cancelled",
            LraStatus::FailedToClose => "FailedToClose",
            LraStatus::FailedToCancel => "FailedToCancel",
        }
    }
}

/// Per-participant callback progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantStatus {
    /// Enlisted, no callback issued yet.
    Active,
    /// A complete call is in flight (or was in flight at crash time).
    CompleteCalled,
    /// Complete acknowledged. The side effect is final; this participant is
    /// never compensated afterwards.
    Completed,
    /// A compensate call is in flight.
    CompensateCalled,
    /// Compensate acknowledged.
    Compensated,
    /// Complete retries exhausted or participant gone.
    FailedToComplete,
    /// Compensate retries exhausted or participant gone.
    FailedToCompensate,
}

impl ParticipantStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ParticipantStatus::Completed
                | ParticipantStatus::Compensated
                | ParticipantStatus::FailedToComplete
                | ParticipantStatus::FailedToCompensate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantStatus::Active => "Active",
            ParticipantStatus::CompleteCalled => "CompleteCalled",
            ParticipantStatus::Completed => "Completed",
            ParticipantStatus::CompensateCalled => "CompensateCalled",
            ParticipantStatus::Compensated => "Compensated",
            ParticipantStatus::FailedToComplete => "FailedToComplete",
            ParticipantStatus::FailedToCompensate => "FailedToCompensate",
        }
    }
}

/// One enlistment: the callback endpoints a participant registered under an
/// LRA, plus its delivery progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub compensate_url: Url,
    pub complete_url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_url: Option<Url>,
    pub status: ParticipantStatus,
    /// Attempts used by the most recent dispatch run. Informational only;
    /// the retry loop keeps its own in-flight counter.
    #[serde(default)]
    pub attempts: u32,
}

impl Participant {
    pub fn new(compensate_url: Url, complete_url: Url, after_url: Option<Url>) -> Self {
        Participant {
            id: ParticipantId::new(),
            compensate_url,
            complete_url,
            after_url,
            status: ParticipantStatus::Active,
            attempts: 0,
        }
    }
}

/// Durable record of one LRA and everything enlisted under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LraRecord {
    pub id: LraId,
    pub status: LraStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LraId>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl LraRecord {
    pub fn new(id: LraId, parent: Option<LraId>) -> Self {
        let now = Utc::now();
        LraRecord {
            id,
            status: LraStatus::Active,
            parent,
            created_at: now,
            last_active_at: now,
            ended_at: None,
            participants: Vec::new(),
        }
    }

    /// Bump the last-activity timestamp; the recovery scanner uses it to
    /// decide staleness.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn any_completed(&self) -> bool {
        self.participants
            .iter()
            .any(|p| p.status == ParticipantStatus::Completed)
    }
}
