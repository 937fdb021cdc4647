use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    alloc::AddressAllocator,
    daemon::KeySource,
    error::Error,
    peer::{Peer, PeerId, PeerPatch, PeerPolicy, PeerUpdate, PeerView, Status, Timestamp},
    settings::{Bootstrap, ServerConfig, SettingsUpdate},
    status::{effective_usage, view},
    store::PeerStore,
    sync::{DriftReport, PeerLifecycleSynchronizer, repair_drift},
    telemetry::{TelemetrySnapshot, TelemetrySource},
    wg::{Key, config::WgConfigInterface},
};

const MAX_ALLOCATION_ATTEMPTS: usize = 8;
const MAX_UPDATE_ATTEMPTS: usize = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DashboardStats {
    pub total: usize,
    pub active: usize,
    pub disabled: usize,
    pub expired: usize,
    pub data_limit_reached: usize,
    pub online: usize,
    pub total_data_used: u64,
}

/// Administrative operations. Creation, deletion and enablement changes sync
/// the daemon before returning; a daemon failure is logged and the persisted
/// record stays authoritative.
#[derive(Debug)]
pub struct PeerService<S, D> {
    store: Arc<S>,
    daemon: Arc<D>,
    create_lock: Mutex<()>,
}

impl<S, D> PeerService<S, D>
where
    S: PeerStore,
    D: KeySource + TelemetrySource + PeerLifecycleSynchronizer,
{
    pub fn new(store: Arc<S>, daemon: Arc<D>) -> Self {
        Self {
            store,
            daemon,
            create_lock: Mutex::new(()),
        }
    }

    /// Returns the stored settings, creating them on first start.
    pub fn ensure_settings(
        &self,
        boot: &Bootstrap,
        existing: Option<&WgConfigInterface>,
    ) -> Result<ServerConfig, Error> {
        if let Some(settings) = self.store.settings()? {
            return Ok(settings);
        }

        let settings = ServerConfig::bootstrap(
            boot,
            existing,
            || self.daemon.keypair(),
            |private| self.daemon.public_key(private).unwrap_or_else(Key::random),
        )?;
        self.store.save_settings(&settings)?;

        log::info!(
            "initialised server settings: {} on {} port {}",
            settings.server_address,
            settings.interface,
            settings.listen_port
        );
        Ok(settings)
    }

    pub fn settings(&self) -> Result<ServerConfig, Error> {
        self.store.settings()?.ok_or(Error::SettingsMissing)
    }

    /// Network, address and keys are fixed after bootstrap.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<ServerConfig, Error> {
        let mut settings = self.settings()?;
        settings.apply(update);
        self.store.save_settings(&settings)?;
        Ok(settings)
    }

    pub fn create_peer(&self, policy: PeerPolicy, now: Timestamp) -> Result<Peer, Error> {
        let allocator = AddressAllocator::new(self.settings()?.network()?);
        let keys = self.daemon.peer_keys();

        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let address = allocator.allocate(&self.store.used_addresses()?)?;
        let mut candidate = Peer::new(policy, keys, address, now);

        let mut attempt = 1;
        let peer = loop {
            match self.store.insert(candidate.clone()) {
                Ok(peer) => break peer,
                // Another process took the address between read and commit.
                Err(Error::AddressInUse(ip)) if attempt < MAX_ALLOCATION_ATTEMPTS => {
                    log::debug!("address {ip} taken concurrently, reallocating");
                    candidate.address = allocator.allocate(&self.store.used_addresses()?)?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        log::info!("created peer {} ({}) at {}", peer.id, peer.name, peer.address);

        if let Err(err) = self.daemon.activate(&peer) {
            log::warn!("peer {} stored but not registered: {err}", peer.id);
        }

        Ok(peer)
    }

    pub fn update_peer(
        &self,
        id: PeerId,
        update: PeerUpdate,
        now: Timestamp,
    ) -> Result<PeerView, Error> {
        let mut toggled = None;

        let peer = self.update_with(id, |current, snapshot| {
            let mut patch = PeerPatch::from(update.clone());
            let usage = snapshot.get(&current.public_key);

            toggled = patch.is_enabled.filter(|enabled| *enabled != current.is_enabled);
            match toggled {
                // Keep what the daemon counted before it forgets the key.
                Some(false) => {
                    patch.data_used = Some(effective_usage(current, usage));
                    patch.usage_counter = Some(0);
                }
                Some(true) => {
                    patch.usage_counter = Some(usage.map_or(0, |u| u.total()));
                }
                None => {}
            }

            patch
        })?;

        match toggled {
            Some(true) => {
                if let Err(err) = self.daemon.activate(&peer) {
                    log::warn!("peer {} enabled but not registered: {err}", peer.id);
                }
            }
            Some(false) => {
                if let Err(err) = self.daemon.deactivate(&peer.public_key) {
                    log::warn!("peer {} disabled but still registered: {err}", peer.id);
                }
            }
            None => {}
        }

        Ok(view(peer, &self.daemon.snapshot(), now))
    }

    /// Deregisters first, then forgets the record.
    pub fn delete_peer(&self, id: PeerId) -> Result<Peer, Error> {
        let peer = self.store.get(id)?.ok_or(Error::PeerNotFound(id))?;

        if let Err(err) = self.daemon.deactivate(&peer.public_key) {
            log::warn!("peer {} could not be deregistered: {err}", peer.id);
        }

        let peer = self.store.remove(id)?.ok_or(Error::PeerNotFound(id))?;
        log::info!("deleted peer {} ({})", peer.id, peer.name);
        Ok(peer)
    }

    pub fn get_peer(&self, id: PeerId, now: Timestamp) -> Result<PeerView, Error> {
        let peer = self.store.get(id)?.ok_or(Error::PeerNotFound(id))?;
        Ok(view(peer, &self.daemon.snapshot(), now))
    }

    pub fn list_peers(&self, now: Timestamp) -> Result<Vec<PeerView>, Error> {
        let snapshot = self.daemon.snapshot();
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|peer| view(peer, &snapshot, now))
            .collect())
    }

    pub fn render_client_config(&self, id: PeerId) -> Result<String, Error> {
        let peer = self.store.get(id)?.ok_or(Error::PeerNotFound(id))?;
        Ok(self.settings()?.client_config(&peer)?.to_string())
    }

    /// Zeroes usage. The daemon counter is kept as the new baseline so the
    /// next poll does not bring the old total back.
    pub fn reset_data(&self, id: PeerId) -> Result<Peer, Error> {
        let peer = self.update_with(id, |current, snapshot| PeerPatch {
            data_used: Some(0),
            usage_counter: Some(
                snapshot
                    .get(&current.public_key)
                    .map_or(current.usage_counter, |u| u.total()),
            ),
            ..Default::default()
        })?;

        log::info!("reset data usage of peer {} ({})", peer.id, peer.name);
        Ok(peer)
    }

    /// Registers every enabled peer, drops disabled ones and any daemon key
    /// the store does not know.
    pub fn resync(&self) -> Result<DriftReport, Error> {
        let snapshot = self.daemon.snapshot();
        if !snapshot.is_available() {
            log::warn!("resync skipped: daemon status unavailable");
        }

        let report = repair_drift(self.daemon.as_ref(), self.store.as_ref(), &snapshot, true)?;
        log::info!("resync: {report:?}");
        Ok(report)
    }

    pub fn stats(&self, now: Timestamp) -> Result<DashboardStats, Error> {
        let mut stats = DashboardStats::default();

        for peer in self.list_peers(now)? {
            stats.total += 1;
            stats.online += usize::from(peer.online);
            stats.total_data_used = stats.total_data_used.saturating_add(peer.data_used);

            match peer.status {
                Status::Active => stats.active += 1,
                Status::Disabled => stats.disabled += 1,
                Status::Expired => stats.expired += 1,
                Status::DataLimitReached => stats.data_limit_reached += 1,
            }
        }

        Ok(stats)
    }

    /// Compare-and-set write of a patch computed from the current record.
    fn update_with(
        &self,
        id: PeerId,
        mut make_patch: impl FnMut(&Peer, &TelemetrySnapshot) -> PeerPatch,
    ) -> Result<Peer, Error> {
        let mut attempt = 1;
        loop {
            let current = self.store.get(id)?.ok_or(Error::PeerNotFound(id))?;
            let patch = make_patch(&current, &self.daemon.snapshot());

            match self.store.update(id, &patch, Some(current.revision)) {
                Err(Error::RevisionConflict(_)) if attempt < MAX_UPDATE_ATTEMPTS => attempt += 1,
                res => return res,
            }
        }
    }
}
