use std::{
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use bincode::{Decode, Encode};
use uuid::Uuid;

use crate::wg::{Cidr, Key};

/// Unix time in seconds.
pub type Timestamp = u64;

pub const SECS_PER_DAY: u64 = 86_400;

/// Renewal and first-contact fallback when a peer has no `expiry_days`.
pub const DEFAULT_EXPIRY_DAYS: u32 = 30;

pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub fn days_from(now: Timestamp, days: u32) -> Timestamp {
    now.saturating_add(u64::from(days) * SECS_PER_DAY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct PeerId(u128);

impl PeerId {
    pub fn random() -> Self {
        PeerId(Uuid::new_v4().as_u128())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PeerId(Uuid::parse_str(s)?.as_u128()))
    }
}

/// A tunnel client as persisted.
///
/// Optional fields are meaningful: `None` limits mean unlimited, a `None`
/// expiry means the peer never expires (or its timer has not started yet).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub email: Option<String>,
    pub note: Option<String>,

    pub private_key: Key,
    pub public_key: Key,
    pub preshared_key: Option<Key>,
    pub address: Cidr,

    pub data_limit: Option<u64>,
    pub expiry_date: Option<Timestamp>,
    pub expiry_days: Option<u32>,
    pub start_on_first_connect: bool,
    pub auto_renew: bool,
    pub auto_renew_days: Option<u32>,
    pub auto_renew_data_limit: Option<u64>,

    pub is_enabled: bool,
    pub data_used: u64,
    /// Last daemon rx+tx counter folded into `data_used`.
    pub usage_counter: u64,
    pub last_handshake: Option<Timestamp>,
    pub first_connection_at: Option<Timestamp>,
    pub timer_started: bool,
    pub renew_count: u32,

    pub created_at: Timestamp,
    /// Bumped by every store write.
    pub revision: u64,
}

/// What an administrator (or a sale) asks for when creating a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerPolicy {
    pub name: String,
    pub email: Option<String>,
    pub note: Option<String>,
    pub data_limit: Option<u64>,
    pub expiry_date: Option<Timestamp>,
    pub expiry_days: Option<u32>,
    pub start_on_first_connect: bool,
    pub auto_renew: bool,
    pub auto_renew_days: Option<u32>,
    pub auto_renew_data_limit: Option<u64>,
}

impl Peer {
    pub fn new(
        policy: PeerPolicy,
        keys: PeerKeys,
        address: Cidr,
        now: Timestamp,
    ) -> Peer {
        // Without first-contact arming the timer runs from creation.
        let timer_started = !policy.start_on_first_connect;
        let expiry_date = if timer_started {
            policy
                .expiry_date
                .or_else(|| policy.expiry_days.map(|days| days_from(now, days)))
        } else {
            None
        };

        Peer {
            id: PeerId::random(),
            name: policy.name,
            email: policy.email,
            note: policy.note,
            private_key: keys.private_key,
            public_key: keys.public_key,
            preshared_key: keys.preshared_key,
            address,
            data_limit: policy.data_limit,
            expiry_date,
            expiry_days: policy.expiry_days,
            start_on_first_connect: policy.start_on_first_connect,
            auto_renew: policy.auto_renew,
            auto_renew_days: policy.auto_renew_days,
            auto_renew_data_limit: policy.auto_renew_data_limit,
            is_enabled: true,
            data_used: 0,
            usage_counter: 0,
            last_handshake: None,
            first_connection_at: None,
            timer_started,
            renew_count: 0,
            created_at: now,
            revision: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerKeys {
    pub private_key: Key,
    pub public_key: Key,
    pub preshared_key: Option<Key>,
}

/// Administrative partial update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerUpdate {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub note: Option<Option<String>>,
    pub data_limit: Option<Option<u64>>,
    pub expiry_date: Option<Option<Timestamp>>,
    pub expiry_days: Option<Option<u32>>,
    pub auto_renew: Option<bool>,
    pub auto_renew_days: Option<Option<u32>>,
    pub auto_renew_data_limit: Option<Option<u64>>,
    pub is_enabled: Option<bool>,
}

/// Field-level write applied by a store. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerPatch {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub note: Option<Option<String>>,
    pub data_limit: Option<Option<u64>>,
    pub expiry_date: Option<Option<Timestamp>>,
    pub expiry_days: Option<Option<u32>>,
    pub auto_renew: Option<bool>,
    pub auto_renew_days: Option<Option<u32>>,
    pub auto_renew_data_limit: Option<Option<u64>>,
    pub is_enabled: Option<bool>,
    pub data_used: Option<u64>,
    pub usage_counter: Option<u64>,
    pub last_handshake: Option<Option<Timestamp>>,
    pub first_connection_at: Option<Option<Timestamp>>,
    pub timer_started: Option<bool>,
    pub renew_count: Option<u32>,
}

impl From<PeerUpdate> for PeerPatch {
    fn from(update: PeerUpdate) -> Self {
        PeerPatch {
            name: update.name,
            email: update.email,
            note: update.note,
            data_limit: update.data_limit,
            expiry_date: update.expiry_date,
            expiry_days: update.expiry_days,
            auto_renew: update.auto_renew,
            auto_renew_days: update.auto_renew_days,
            auto_renew_data_limit: update.auto_renew_data_limit,
            is_enabled: update.is_enabled,
            ..Default::default()
        }
    }
}

impl PeerPatch {
    pub fn is_empty(&self) -> bool {
        *self == PeerPatch::default()
    }

    pub fn apply(&self, peer: &mut Peer) {
        fn set<T: Clone>(field: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *field = v.clone();
            }
        }

        set(&mut peer.name, &self.name);
        set(&mut peer.email, &self.email);
        set(&mut peer.note, &self.note);
        set(&mut peer.data_limit, &self.data_limit);
        set(&mut peer.expiry_date, &self.expiry_date);
        set(&mut peer.expiry_days, &self.expiry_days);
        set(&mut peer.auto_renew, &self.auto_renew);
        set(&mut peer.auto_renew_days, &self.auto_renew_days);
        set(&mut peer.auto_renew_data_limit, &self.auto_renew_data_limit);
        set(&mut peer.is_enabled, &self.is_enabled);
        set(&mut peer.data_used, &self.data_used);
        set(&mut peer.usage_counter, &self.usage_counter);
        set(&mut peer.last_handshake, &self.last_handshake);
        set(&mut peer.first_connection_at, &self.first_connection_at);
        set(&mut peer.timer_started, &self.timer_started);
        set(&mut peer.renew_count, &self.renew_count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Disabled,
    Expired,
    DataLimitReached,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Active => "active",
            Status::Disabled => "disabled",
            Status::Expired => "expired",
            Status::DataLimitReached => "data_limit_reached",
        })
    }
}

/// A peer with its derived, never persisted, live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerView {
    pub peer: Peer,
    pub status: Status,
    pub online: bool,
    /// Persisted usage plus traffic not yet folded in by the reconciler.
    pub data_used: u64,
}
