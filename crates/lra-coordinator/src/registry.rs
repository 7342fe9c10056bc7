//! Participant enlistment.
//!
//! Enlistment is idempotent per (compensate, complete) URL pair: a
//! participant that re-joins after a lost response gets its original
//! enlistment back instead of a duplicate.

use url::Url;

use crate::types::{LraRecord, LraStatus, Participant};

#[derive(Debug, thiserror::Error)]
pub enum EnlistError {
    #[error("lra is no longer accepting enlistments")]
    AlreadyTerminal,
}

/// Result of an enlistment request.
#[derive(Debug, Clone)]
pub struct Enlistment {
    pub participant: Participant,
    /// False when the (compensate, complete) pair was already enlisted and
    /// the existing participant was returned.
    pub created: bool,
}

/// Enlist a participant under `record`, or return the existing enlistment
/// for the same callback pair. The caller persists the record when `created`.
pub fn enlist(
    record: &mut LraRecord,
    compensate_url: Url,
    complete_url: Url,
    after_url: Option<Url>,
) -> Result<Enlistment, EnlistError> {
    if record.status != LraStatus::Active {
        return Err(EnlistError::AlreadyTerminal);
    }

    if let Some(existing) = record
        .participants
        .iter()
        .find(|p| p.compensate_url == compensate_url && p.complete_url == complete_url)
    {
        return Ok(Enlistment {
            participant: existing.clone(),
            created: false,
        });
    }

    let participant = Participant::new(compensate_url, complete_url, after_url);
    record.participants.push(participant.clone());
    Ok(Enlistment {
        participant,
        created: true,
    })
}
