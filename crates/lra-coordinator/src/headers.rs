//! Wire-contract constants shared by the coordinator API and the callback
//! client. Names match the MicroProfile LRA participant contract so existing
//! participants remain compatible.

use crate::types::{LraId, ParticipantId};

/// Identifies the active LRA a request enlists under or acts upon.
pub const LRA_CONTEXT_HEADER: &str = "Long-Running-Action";

/// Opaque URI a participant may use to query its enlistment out-of-band.
pub const LRA_RECOVERY_HEADER: &str = "Long-Running-Action-Recovery";

/// Carries the terminated LRA id on `after` notifications.
pub const LRA_ENDED_CONTEXT_HEADER: &str = "Long-Running-Action-Ended";

/// The recovery URI handed to a participant at enlistment time. It doubles as
/// the coordinator's own query endpoint for that enlistment.
pub fn recovery_uri(lra: &LraId, participant: ParticipantId) -> String {
    format!("{lra}/recovery/{participant}")
}
