use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::{
    error::Error,
    peer::{DEFAULT_EXPIRY_DAYS, Peer, PeerPatch, Timestamp, days_from, unix_now},
    status::effective_usage,
    store::PeerStore,
    sync::{DriftReport, PeerLifecycleSynchronizer, repair_drift},
    telemetry::{PeerUsage, TelemetrySnapshot, TelemetrySource},
};

pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Used for first-contact arming and renewal when a peer has no `expiry_days`.
    pub default_expiry_days: u32,
    /// Re-register enabled peers the daemon lost and drop disabled ones it kept.
    pub repair_drift: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: RECONCILE_INTERVAL,
            default_expiry_days: DEFAULT_EXPIRY_DAYS,
            repair_drift: true,
        }
    }
}

/// What one cycle decided for one peer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerPlan {
    pub patch: PeerPatch,
    pub armed: bool,
    pub renewed: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub updated: usize,
    pub armed: usize,
    pub renewed: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub drift: DriftReport,
}

/// Decides the field updates for one enabled peer: usage refresh, then
/// first-contact timer arming, then auto-renewal against the refreshed values.
pub fn plan(
    peer: &Peer,
    usage: Option<&PeerUsage>,
    now: Timestamp,
    default_days: u32,
) -> PeerPlan {
    let mut plan = PeerPlan::default();

    let mut data_used = peer.data_used;
    if let Some(usage) = usage {
        data_used = effective_usage(peer, Some(usage));
        if data_used != peer.data_used {
            plan.patch.data_used = Some(data_used);
        }
        if usage.total() != peer.usage_counter {
            plan.patch.usage_counter = Some(usage.total());
        }
        if usage.last_handshake.is_some() && usage.last_handshake != peer.last_handshake {
            plan.patch.last_handshake = Some(usage.last_handshake);
        }
    }

    let mut expiry_date = peer.expiry_date;
    let first_contact = usage.is_some_and(|u| u.last_handshake.is_some());
    if peer.start_on_first_connect && !peer.timer_started && first_contact {
        let days = peer.expiry_days.unwrap_or(default_days);
        expiry_date = Some(days_from(now, days));

        plan.patch.first_connection_at = Some(Some(now));
        plan.patch.timer_started = Some(true);
        plan.patch.expiry_date = Some(expiry_date);
        plan.armed = true;
    }

    if peer.auto_renew {
        let expired = expiry_date.is_some_and(|expiry| expiry < now);
        let exhausted = peer.data_limit.is_some_and(|limit| data_used >= limit);

        if expired || exhausted {
            let days = peer
                .auto_renew_days
                .or(peer.expiry_days)
                .unwrap_or(default_days);

            plan.patch.data_used = Some(0);
            plan.patch.renew_count = Some(peer.renew_count.saturating_add(1));
            plan.patch.expiry_date = Some(Some(days_from(now, days)));
            if let Some(limit) = peer.auto_renew_data_limit {
                plan.patch.data_limit = Some(Some(limit));
            }
            plan.renewed = true;
        }
    }

    plan
}

/// Periodic driver over all enabled peers.
#[derive(Debug)]
pub struct Reconciler<S, D> {
    store: Arc<S>,
    daemon: Arc<D>,
    config: ReconcilerConfig,
}

impl<S, D> Reconciler<S, D>
where
    S: PeerStore + 'static,
    D: TelemetrySource + PeerLifecycleSynchronizer + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>, daemon: Arc<D>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            daemon,
            config,
        }
    }

    /// One pass. Never fails as a whole: per-peer errors and panics are
    /// logged and counted.
    pub fn run_cycle(&self, now: Timestamp) -> CycleReport {
        let mut report = CycleReport::default();

        // Taken before listing, so a peer deleted in between is absent from
        // both rather than looking like one the daemon lost.
        let snapshot = self.daemon.snapshot();

        let peers = match self.store.list() {
            Ok(peers) => peers,
            Err(err) => {
                log::error!("reconcile: cannot list peers: {err}");
                report.failed += 1;
                return report;
            }
        };

        for peer in peers.iter().filter(|p| p.is_enabled) {
            report.evaluated += 1;

            let res = catch_unwind(AssertUnwindSafe(|| self.reconcile_peer(peer, &snapshot, now)));

            match res {
                Ok(Ok(Some(plan))) => {
                    report.updated += 1;
                    report.armed += usize::from(plan.armed);
                    report.renewed += usize::from(plan.renewed);
                }
                Ok(Ok(None)) => {}
                Ok(Err(Error::RevisionConflict(id))) => {
                    log::info!("reconcile: peer {id} changed concurrently, retrying next cycle");
                    report.conflicts += 1;
                }
                Ok(Err(Error::PeerNotFound(id))) => {
                    log::debug!("reconcile: peer {id} deleted during the cycle");
                }
                Ok(Err(err)) => {
                    log::error!("reconcile: peer {} ({}) failed: {err}", peer.id, peer.name);
                    report.failed += 1;
                }
                Err(_) => {
                    log::error!("reconcile: peer {} ({}) panicked", peer.id, peer.name);
                    report.failed += 1;
                }
            }
        }

        if self.config.repair_drift {
            match repair_drift(self.daemon.as_ref(), self.store.as_ref(), &snapshot, false) {
                Ok(drift) => report.drift = drift,
                Err(err) => {
                    log::error!("reconcile: drift repair failed: {err}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn reconcile_peer(
        &self,
        peer: &Peer,
        snapshot: &TelemetrySnapshot,
        now: Timestamp,
    ) -> Result<Option<PeerPlan>, Error> {
        let plan = plan(
            peer,
            snapshot.get(&peer.public_key),
            now,
            self.config.default_expiry_days,
        );
        if plan.patch.is_empty() {
            return Ok(None);
        }

        // Conditional on the revision we planned from.
        self.store.update(peer.id, &plan.patch, Some(peer.revision))?;

        if plan.armed {
            log::info!("peer {} ({}) connected for the first time, timer started", peer.id, peer.name);
        }
        if plan.renewed {
            log::info!(
                "peer {} ({}) auto-renewed (renewal #{})",
                peer.id,
                peer.name,
                peer.renew_count.saturating_add(1)
            );
        }

        Ok(Some(plan))
    }

    /// Runs cycles every `interval` until `shutdown` fires or its sender is
    /// dropped. A cycle in flight is allowed to finish.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            log::info!(
                "reconciler started, interval {}s",
                self.config.interval.as_secs()
            );

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        log::info!("reconciler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let this = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || this.run_cycle(unix_now())).await {
                            Ok(report) if report.updated > 0 || report.failed > 0 || report.drift.changes() > 0 => {
                                log::info!("reconcile cycle: {report:?}");
                            }
                            Ok(report) => log::debug!("reconcile cycle: {report:?}"),
                            Err(err) => log::error!("reconcile cycle aborted: {err}"),
                        }
                    }
                }
            }
        })
    }
}
