//! Background sweep that re-drives stuck LRAs.
//!
//! A coordinator crash or an unreachable participant leaves an LRA parked in
//! Closing or Cancelling. The scanner re-drives any such LRA once it has
//! been idle past the staleness threshold; acknowledged participants are
//! skipped by the engine, so a sweep is always safe to repeat. The sweep
//! also enforces the optional deadline on Active LRAs and purges terminal
//! records past the retention window.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::engine::Coordinator;
use crate::store::{LraStore, StoreError};
use crate::types::LraStatus;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Stuck LRAs handed back to the engine's dispatch loop.
    pub redriven: usize,
    /// Active LRAs cancelled for exceeding the deadline.
    pub expired: usize,
    /// Terminal LRAs removed after the retention window.
    pub purged: usize,
}

pub struct RecoveryScanner {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn LraStore>,
    config: RecoveryConfig,
}

impl RecoveryScanner {
    pub fn new(
        coordinator: Arc<Coordinator>,
        store: Arc<dyn LraStore>,
        config: RecoveryConfig,
    ) -> Self {
        RecoveryScanner {
            coordinator,
            store,
            config,
        }
    }

    /// Sweep on a fixed interval until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a restart does not
        // re-drive everything before the server is even listening.
        tick.tick().await;

        info!(
            interval = %durationfmt::to_string(self.config.interval),
            "recovery scanner running"
        );
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(stats) if stats != SweepStats::default() => {
                            info!(
                                redriven = stats.redriven,
                                expired = stats.expired,
                                purged = stats.purged,
                                "recovery sweep acted"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "recovery sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("recovery scanner stopping");
                    return;
                }
            }
        }
    }

    /// One pass over the store.
    pub async fn sweep(&self) -> Result<SweepStats, StoreError> {
        let now = Utc::now();
        let staleness = to_chrono(self.config.staleness);
        let mut stats = SweepStats::default();

        for id in self.store.list_non_terminal().await? {
            let Some(record) = self.store.get(&id).await? else {
                continue;
            };
            match record.status {
                LraStatus::Active => {
                    let Some(deadline) = self.config.lra_deadline else {
                        continue;
                    };
                    if now - record.created_at > to_chrono(deadline) {
                        info!(lra = %id, "lra exceeded deadline, cancelling");
                        if let Err(e) = self.coordinator.cancel(&id).await {
                            warn!(lra = %id, error = %e, "deadline cancel failed");
                        } else {
                            stats.expired += 1;
                        }
                    }
                }
                LraStatus::Closing | LraStatus::Cancelling => {
                    if now - record.last_active_at > staleness {
                        debug!(
                            lra = %id,
                            status = record.status.as_str(),
                            "re-driving stale lra"
                        );
                        self.coordinator.spawn_drive(id.clone());
                        stats.redriven += 1;
                    }
                }
                _ => {}
            }
        }

        let cutoff = now - to_chrono(self.config.retention);
        for id in self.store.list_terminal_ended_before(cutoff).await? {
            debug!(lra = %id, "purging retained lra");
            self.store.remove(&id).await?;
            self.coordinator.release_locks(&id);
            stats.purged += 1;
        }

        Ok(stats)
    }
}

fn to_chrono(dur: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(dur).unwrap_or(chrono::Duration::MAX)
}
