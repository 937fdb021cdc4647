use std::{collections::HashSet, net::IpAddr};

use bincode::{Decode, Encode};

use crate::{
    error::Error,
    peer::{Peer, PeerId, PeerPatch},
    settings::ServerConfig,
};

pub mod file;
#[cfg(test)]
pub mod memory;

/// Everything the panel persists.
#[derive(Debug, Default, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StoreData {
    pub settings: Option<ServerConfig>,
    pub peers: Vec<Peer>,
}

impl StoreData {
    fn position(&self, id: PeerId) -> Option<usize> {
        self.peers.iter().position(|p| p.id == id)
    }

    fn insert(&mut self, peer: Peer) -> Result<Peer, Error> {
        let ip = peer.address.ip;
        let taken = self.peers.iter().any(|p| p.address.ip == ip)
            || self
                .settings
                .as_ref()
                .is_some_and(|s| s.server_address.ip == ip);
        if taken {
            return Err(Error::AddressInUse(ip));
        }

        self.peers.push(peer.clone());
        Ok(peer)
    }

    fn update(
        &mut self,
        id: PeerId,
        patch: &PeerPatch,
        expected_revision: Option<u64>,
    ) -> Result<Peer, Error> {
        let idx = self.position(id).ok_or(Error::PeerNotFound(id))?;
        let peer = &mut self.peers[idx];

        if expected_revision.is_some_and(|rev| rev != peer.revision) {
            return Err(Error::RevisionConflict(id));
        }

        patch.apply(peer);
        peer.revision += 1;
        Ok(peer.clone())
    }

    fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.position(id).map(|idx| self.peers.remove(idx))
    }
}

/// Persistence boundary. Implementations serialise `write` calls; each one is
/// atomic with respect to other writers of the same store.
pub trait PeerStore: Send + Sync {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, Error>;

    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T, Error>) -> Result<T, Error>;

    fn list(&self) -> Result<Vec<Peer>, Error> {
        self.read(|data| data.peers.clone())
    }

    fn get(&self, id: PeerId) -> Result<Option<Peer>, Error> {
        self.read(|data| data.peers.iter().find(|p| p.id == id).cloned())
    }

    /// Fails with `AddressInUse` when another peer or the server owns the address.
    fn insert(&self, peer: Peer) -> Result<Peer, Error> {
        self.write(|data| data.insert(peer))
    }

    /// Applies only the fields set in `patch`. With `expected_revision` the
    /// write is a compare-and-set and fails with `RevisionConflict`.
    fn update(
        &self,
        id: PeerId,
        patch: &PeerPatch,
        expected_revision: Option<u64>,
    ) -> Result<Peer, Error> {
        self.write(|data| data.update(id, patch, expected_revision))
    }

    fn remove(&self, id: PeerId) -> Result<Option<Peer>, Error> {
        self.write(|data| Ok(data.remove(id)))
    }

    /// Addresses owned by peers, plus the server's own.
    fn used_addresses(&self) -> Result<HashSet<IpAddr>, Error> {
        self.read(|data| {
            data.peers
                .iter()
                .map(|p| p.address.ip)
                .chain(data.settings.as_ref().map(|s| s.server_address.ip))
                .collect()
        })
    }

    fn settings(&self) -> Result<Option<ServerConfig>, Error> {
        self.read(|data| data.settings.clone())
    }

    fn save_settings(&self, settings: &ServerConfig) -> Result<(), Error> {
        self.write(|data| {
            data.settings = Some(settings.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        peer::{PeerPolicy, Timestamp, tests::keys},
        wg::Cidr,
    };

    pub(crate) fn peer_at(address: &str, now: Timestamp) -> Peer {
        Peer::new(
            PeerPolicy {
                name: format!("peer {address}"),
                ..Default::default()
            },
            keys(),
            address.parse::<Cidr>().unwrap(),
            now,
        )
    }

    /// Behaviour every backend must share.
    pub(crate) fn exercise(store: &impl PeerStore) {
        let a = store.insert(peer_at("10.0.0.2/32", 1)).unwrap();
        let b = store.insert(peer_at("10.0.0.3/32", 1)).unwrap();

        assert!(matches!(
            store.insert(peer_at("10.0.0.2/32", 1)),
            Err(Error::AddressInUse(_))
        ));

        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.get(a.id).unwrap().unwrap().name, a.name);

        let patch = PeerPatch {
            data_used: Some(7),
            ..Default::default()
        };
        let updated = store.update(a.id, &patch, Some(0)).unwrap();
        assert_eq!(updated.data_used, 7);
        assert_eq!(updated.revision, 1);

        assert!(matches!(
            store.update(a.id, &patch, Some(0)),
            Err(Error::RevisionConflict(_))
        ));
        assert_eq!(store.update(a.id, &patch, None).unwrap().revision, 2);

        let used = store.used_addresses().unwrap();
        assert!(used.contains(&a.address.ip));
        assert!(used.contains(&b.address.ip));

        assert_eq!(store.remove(b.id).unwrap().map(|p| p.id), Some(b.id));
        assert_eq!(store.remove(b.id).unwrap(), None);
        assert!(matches!(
            store.update(b.id, &patch, None),
            Err(Error::PeerNotFound(_))
        ));
    }
}
