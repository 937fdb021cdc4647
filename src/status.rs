use crate::{
    peer::{Peer, PeerView, Status, Timestamp},
    telemetry::{PeerUsage, TelemetrySnapshot},
};

/// Traffic the daemon reports beyond what `peer.data_used` already covers.
///
/// A counter lower than the last one seen means the daemon started counting
/// again (restart or re-registration), so all of it is new.
pub fn pending_usage(peer: &Peer, usage: Option<&PeerUsage>) -> u64 {
    let Some(usage) = usage else {
        return 0;
    };

    let counter = usage.total();
    if counter >= peer.usage_counter {
        counter - peer.usage_counter
    } else {
        counter
    }
}

pub fn effective_usage(peer: &Peer, usage: Option<&PeerUsage>) -> u64 {
    peer.data_used.saturating_add(pending_usage(peer, usage))
}

/// First match wins: disabled, expired, over the data ceiling, active.
pub fn derive_status(peer: &Peer, snapshot: &TelemetrySnapshot, now: Timestamp) -> Status {
    if !peer.is_enabled {
        return Status::Disabled;
    }

    if peer.expiry_date.is_some_and(|expiry| expiry < now) {
        return Status::Expired;
    }

    let used = effective_usage(peer, snapshot.get(&peer.public_key));
    if peer.data_limit.is_some_and(|limit| used >= limit) {
        return Status::DataLimitReached;
    }

    Status::Active
}

pub fn is_online(peer: &Peer, snapshot: &TelemetrySnapshot, now: Timestamp) -> bool {
    snapshot
        .get(&peer.public_key)
        .is_some_and(|usage| usage.is_online(now))
}

pub fn view(peer: Peer, snapshot: &TelemetrySnapshot, now: Timestamp) -> PeerView {
    PeerView {
        status: derive_status(&peer, snapshot, now),
        online: is_online(&peer, snapshot, now),
        data_used: effective_usage(&peer, snapshot.get(&peer.public_key)),
        peer,
    }
}
