//! Coordinator core for Long Running Actions (LRAs).
//!
//! An LRA is a saga-style distributed transaction: participants enlist
//! compensate/complete callback endpoints, and the coordinator drives those
//! callbacks when the LRA is closed or cancelled, retrying until every
//! participant acknowledges or retries are exhausted. A background scanner
//! re-drives anything left non-terminal by a crash or an unreachable
//! participant.
//!
//! Wiring order mirrors the data flow: a [`store::LraStore`] holds the
//! records, a [`dispatch::Dispatcher`] delivers callbacks, the
//! [`engine::Coordinator`] owns the state machine, [`http::app`] exposes it,
//! and a [`recovery::RecoveryScanner`] sweeps in the background.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod headers;
pub mod http;
pub mod recovery;
pub mod registry;
pub mod serde_dur;
pub mod store;
pub mod types;

pub use config::Config;
pub use engine::{Coordinator, CoordinatorError};
pub use types::{LraId, LraRecord, LraStatus, Participant, ParticipantId, ParticipantStatus};
