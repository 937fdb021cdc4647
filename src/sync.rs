use std::{collections::HashSet, fmt::Display};

use crate::{error::Error, peer::Peer, store::PeerStore, telemetry::TelemetrySnapshot, wg::Key};

/// Keeps the daemon's peer table in line with the persisted enabled set.
///
/// Both operations are idempotent. A failure leaves the persisted record as
/// the intended state; drift repair or an explicit resync fixes it later.
pub trait PeerLifecycleSynchronizer {
    type Error: Display;

    /// Registers key, pre-shared key and address, then persists the daemon config.
    fn activate(&self, peer: &Peer) -> Result<(), Self::Error>;

    /// Removes the key (absent keys are fine), then persists the daemon config.
    fn deactivate(&self, public_key: &Key) -> Result<(), Self::Error>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriftReport {
    pub activated: usize,
    pub deactivated: usize,
    pub removed_unknown: usize,
    pub failed: usize,
}

impl DriftReport {
    pub fn changes(&self) -> usize {
        self.activated + self.deactivated + self.removed_unknown
    }
}

/// Compares the stored peers against what the daemon reported and fixes the
/// difference.
///
/// `snapshot` must be taken before this call. Peers are listed afterwards, so
/// one deleted in between is never mistaken for a lost registration, and each
/// peer is read again right before the daemon is touched.
///
/// With `remove_unknown`, daemon keys that belong to no stored peer are
/// deregistered too. Does nothing when the snapshot is unavailable, since an
/// empty answer from a missing daemon says nothing about its table.
pub fn repair_drift<S, P>(
    sync: &S,
    store: &P,
    snapshot: &TelemetrySnapshot,
    remove_unknown: bool,
) -> Result<DriftReport, Error>
where
    S: PeerLifecycleSynchronizer,
    P: PeerStore,
{
    let mut report = DriftReport::default();
    if !snapshot.is_available() {
        return Ok(report);
    }

    let peers = store.list()?;

    for listed in &peers {
        if listed.is_enabled == snapshot.contains(&listed.public_key) {
            continue;
        }

        let peer = match store.get(listed.id) {
            Ok(Some(peer)) if peer.is_enabled == listed.is_enabled => peer,
            Ok(_) => {
                log::debug!("peer {} changed during drift repair, skipped", listed.id);
                continue;
            }
            Err(err) => {
                log::warn!("drift repair cannot read peer {}: {err}", listed.id);
                report.failed += 1;
                continue;
            }
        };

        let res = if peer.is_enabled {
            sync.activate(&peer).map(|_| report.activated += 1)
        } else {
            sync.deactivate(&peer.public_key)
                .map(|_| report.deactivated += 1)
        };

        if let Err(err) = res {
            log::warn!("drift repair for peer {} ({}) failed: {err}", peer.id, peer.name);
            report.failed += 1;
        }
    }

    if remove_unknown {
        let known: HashSet<&Key> = peers.iter().map(|p| &p.public_key).collect();

        for key in snapshot.keys().filter(|k| !known.contains(k)) {
            match sync.deactivate(key) {
                Ok(()) => {
                    log::info!("removed unknown daemon peer {key}");
                    report.removed_unknown += 1;
                }
                Err(err) => {
                    log::warn!("removing unknown daemon peer {key} failed: {err}");
                    report.failed += 1;
                }
            }
        }
    }

    Ok(report)
}
