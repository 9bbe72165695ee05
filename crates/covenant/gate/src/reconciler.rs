//! Reconciliation sweep and scheduler
//!
//! A sweep finds every known member of every known space who has no record
//! for the current version and feeds one synthetic event per member through
//! the engine. Sweeps never write to the ledger, so running one twice only
//! re-confirms restrictions.

use crate::engine::{Effect, EffectStatus, GatekeeperEngine};
use crate::error::GateResult;
use covenant_types::{GateEvent, MemberId, SpaceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Counters from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Spaces examined
    pub spaces: usize,

    /// (member, space) pairs without a current acknowledgement
    pub candidates: usize,

    /// Pairs that ended in a restriction
    pub enforced: usize,

    /// Pairs that needed nothing (absent, exempt, acknowledged meanwhile)
    pub skipped: usize,

    /// Pairs or spaces where a storage or platform step failed
    pub failures: usize,

    /// Shutdown was requested before the sweep finished
    pub interrupted: bool,
}

/// Runs reconciliation sweeps until shutdown
pub struct ReconciliationScheduler {
    engine: Arc<GatekeeperEngine>,
    shutdown: watch::Receiver<bool>,
    sweep_on_start: bool,
}

impl ReconciliationScheduler {
    /// `shutdown` flips to `true` when the process should stop
    pub fn new(engine: Arc<GatekeeperEngine>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            engine,
            shutdown,
            sweep_on_start: true,
        }
    }

    pub fn with_sweep_on_start(mut self, sweep_on_start: bool) -> Self {
        self.sweep_on_start = sweep_on_start;
        self
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn candidates(&self, space: SpaceId) -> GateResult<Vec<MemberId>> {
        let members = self
            .engine
            .ledger()
            .unacknowledged_members(space, self.engine.policy().version())
            .await?;
        Ok(members)
    }

    /// Run one full sweep
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let version = self.engine.policy().version().clone();

        let spaces = match self.engine.ledger().known_spaces().await {
            Ok(spaces) => spaces,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list known spaces");
                report.failures += 1;
                return report;
            }
        };

        tracing::info!(spaces = spaces.len(), version = %version, "Starting reconciliation sweep");

        'spaces: for space in spaces {
            if self.stopping() {
                report.interrupted = true;
                break;
            }
            report.spaces += 1;

            let members = match self.candidates(space).await {
                Ok(members) => members,
                Err(e) => {
                    tracing::error!(space = %space, error = %e, "Failed to list unacknowledged members");
                    report.failures += 1;
                    continue;
                }
            };
            report.candidates += members.len();

            for member in members {
                if self.stopping() {
                    report.interrupted = true;
                    break 'spaces;
                }

                match self.engine.handle(GateEvent::unacknowledged(member, space)).await {
                    // Counted by the restriction itself; notice failures are
                    // logged by the engine.
                    Ok(outcome) => match outcome.status(Effect::Restrict) {
                        Some(EffectStatus::Applied) => report.enforced += 1,
                        Some(EffectStatus::Failed(_)) => report.failures += 1,
                        _ if outcome.has_failures() => report.failures += 1,
                        _ => report.skipped += 1,
                    },
                    Err(e) => {
                        tracing::error!(
                            member = %member,
                            space = %space,
                            error = %e,
                            "Failed to reconcile member"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        if report.interrupted {
            tracing::warn!(?report, "Reconciliation sweep interrupted by shutdown");
        } else {
            tracing::info!(?report, "Reconciliation sweep finished");
        }
        report
    }

    /// Sweep on start (unless disabled), then on every tick until shutdown
    pub async fn run(&self, period: Duration) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !self.sweep_on_start {
            ticker.tick().await;
        }

        tracing::info!(period_secs = period.as_secs(), "Reconciliation scheduler started");

        loop {
            if self.stopping() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reconciliation scheduler stopped");
    }
}
