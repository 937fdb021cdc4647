use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use crate::error::Error;

use super::{Key, WgState, WireguardApi, instance::WgInterfaceInfo, peer::WgPeerInfo};

/// In-memory daemon. Peers keep their insertion order like `wg` does.
#[derive(Debug, Default)]
pub struct FakeWireguard {
    peers: Mutex<Vec<WgPeerInfo>>,
    down: AtomicBool,
    missing: AtomicBool,
    saves: Mutex<usize>,
}

impl FakeWireguard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave as if the `wg` tool is not installed.
    pub fn set_missing(&self, missing: bool) {
        self.missing.store(missing, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_transfer(&self, key: &Key, rx: u64, tx: u64) {
        self.with_peer(key, |peer| peer.transfer = Some((rx, tx)));
    }

    pub fn set_handshake(&self, key: &Key, at: Option<u64>) {
        self.with_peer(key, |peer| peer.latest_handshake = at);
    }

    pub fn peer(&self, key: &Key) -> Option<WgPeerInfo> {
        self.lock().iter().find(|p| p.public_key == *key).cloned()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    /// Registers a peer behind the panel's back.
    pub fn insert_raw(&self, peer: WgPeerInfo) {
        self.lock().push(peer);
    }

    fn with_peer(&self, key: &Key, f: impl FnOnce(&mut WgPeerInfo)) {
        if let Some(peer) = self.lock().iter_mut().find(|p| p.public_key == *key) {
            f(peer);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<WgPeerInfo>> {
        self.peers.lock().unwrap()
    }

    fn check(&self) -> Result<(), Error> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(Error::IoError(std::io::ErrorKind::NotFound.into()));
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::WgCommandFail(Some(1)));
        }
        Ok(())
    }
}

impl WireguardApi for FakeWireguard {
    type Error = Error;

    fn generate_private_key(&self) -> Result<Key, Self::Error> {
        self.check()?;
        Ok(Key::random())
    }

    fn public_key(&self, private_key: &Key) -> Result<Key, Self::Error> {
        self.check()?;
        // Not a curve operation, only needs to be deterministic.
        let mut bytes = [0u8; 32];
        for (i, b) in private_key.as_ref().iter().enumerate() {
            bytes[31 - i] = b ^ 0x5a;
        }
        Ok(Key(bytes))
    }

    fn generate_preshared_key(&self) -> Result<Key, Self::Error> {
        self.check()?;
        Ok(Key::random())
    }

    fn dump(&self, _iface: &str) -> Result<WgState, Self::Error> {
        self.check()?;
        Ok(WgState {
            interface: WgInterfaceInfo {
                listen_port: Some(51820),
                ..Default::default()
            },
            peers: self.lock().clone(),
        })
    }

    fn set_peer(&self, _iface: &str, peer: &WgPeerInfo) -> Result<(), Self::Error> {
        self.check()?;
        let mut peers = self.lock();
        match peers.iter_mut().find(|p| p.public_key == peer.public_key) {
            Some(existing) => {
                existing.preshared_key = peer.preshared_key;
                existing.allowed_ips = peer.allowed_ips.clone();
            }
            None => peers.push(WgPeerInfo {
                transfer: Some((0, 0)),
                latest_handshake: None,
                ..peer.clone()
            }),
        }
        Ok(())
    }

    fn remove_peer(&self, _iface: &str, key: &Key) -> Result<(), Self::Error> {
        self.check()?;
        self.lock().retain(|p| p.public_key != *key);
        Ok(())
    }

    fn save_config(&self, _iface: &str) -> Result<(), Self::Error> {
        self.check()?;
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    fn is_installed(&self) -> bool {
        !self.missing.load(Ordering::SeqCst)
    }

    fn is_interface_up(&self, _iface: &str) -> bool {
        self.check().is_ok()
    }

    fn interface_up(&self, _iface: &str) -> Result<(), Self::Error> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(Error::IoError(std::io::ErrorKind::NotFound.into()));
        }
        self.down.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn interface_down(&self, _iface: &str) -> Result<(), Self::Error> {
        self.check()?;
        self.down.store(true, Ordering::SeqCst);
        self.lock().iter_mut().for_each(|p| p.transfer = Some((0, 0)));
        Ok(())
    }
}
