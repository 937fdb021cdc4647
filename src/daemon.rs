use std::fmt::Display;

use crate::{
    peer::{Peer, PeerKeys},
    sync::PeerLifecycleSynchronizer,
    telemetry::{TelemetrySnapshot, TelemetrySource},
    wg::{Key, WireguardApi, peer::WgPeerInfo},
};

/// Fresh key material for new peers and servers. Never fails.
pub trait KeySource {
    fn keypair(&self) -> (Key, Key);
    fn public_key(&self, private_key: &Key) -> Option<Key>;
    fn preshared_key(&self) -> Key;

    fn peer_keys(&self) -> PeerKeys {
        let (private_key, public_key) = self.keypair();
        PeerKeys {
            private_key,
            public_key,
            preshared_key: Some(self.preshared_key()),
        }
    }
}

/// Diagnostics for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub installed: bool,
    pub interface_up: bool,
    pub interface: String,
}

/// One daemon interface. Every interaction with the tunnel daemon goes
/// through here.
#[derive(Debug)]
pub struct Daemon<W> {
    api: W,
    iface: String,
}

impl<W> Daemon<W>
where
    W: WireguardApi,
    W::Error: Display,
{
    pub fn new(api: W, iface: impl Into<String>) -> Self {
        Self {
            api,
            iface: iface.into(),
        }
    }

    #[cfg(test)]
    pub fn api(&self) -> &W {
        &self.api
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            installed: self.api.is_installed(),
            interface_up: self.api.is_interface_up(&self.iface),
            interface: self.iface.clone(),
        }
    }

    pub fn interface_up(&self) -> Result<(), W::Error> {
        log::info!("bringing {} up", self.iface);
        self.api.interface_up(&self.iface)
    }

    pub fn interface_down(&self) -> Result<(), W::Error> {
        log::info!("bringing {} down", self.iface);
        self.api.interface_down(&self.iface)
    }

    pub fn restart_interface(&self) -> Result<(), W::Error> {
        if let Err(err) = self.api.interface_down(&self.iface) {
            log::debug!("{} was not up: {err}", self.iface);
        }
        self.interface_up()
    }

    fn persist(&self) {
        if let Err(err) = self.api.save_config(&self.iface) {
            log::warn!("could not persist {} config: {err}", self.iface);
        }
    }
}

impl<W> KeySource for Daemon<W>
where
    W: WireguardApi,
    W::Error: Display,
{
    fn keypair(&self) -> (Key, Key) {
        let pair = self
            .api
            .generate_private_key()
            .and_then(|private| Ok((private, self.api.public_key(&private)?)));

        pair.unwrap_or_else(|err| {
            log::warn!("wg key generation unavailable ({err}), using random keys");
            (Key::random(), Key::random())
        })
    }

    fn public_key(&self, private_key: &Key) -> Option<Key> {
        self.api
            .public_key(private_key)
            .inspect_err(|err| log::warn!("wg pubkey unavailable: {err}"))
            .ok()
    }

    fn preshared_key(&self) -> Key {
        self.api.generate_preshared_key().unwrap_or_else(|err| {
            log::warn!("wg genpsk unavailable ({err}), using a random key");
            Key::random()
        })
    }
}

impl<W> TelemetrySource for Daemon<W>
where
    W: WireguardApi,
    W::Error: Display,
{
    fn snapshot(&self) -> TelemetrySnapshot {
        match self.api.dump(&self.iface) {
            Ok(state) => state.into(),
            Err(err) => {
                log::debug!("no telemetry from {}: {err}", self.iface);
                TelemetrySnapshot::unavailable()
            }
        }
    }
}

impl<W> PeerLifecycleSynchronizer for Daemon<W>
where
    W: WireguardApi,
    W::Error: Display,
{
    type Error = W::Error;

    fn activate(&self, peer: &Peer) -> Result<(), Self::Error> {
        let info = WgPeerInfo {
            public_key: peer.public_key,
            preshared_key: peer.preshared_key,
            allowed_ips: Some(vec![peer.address]),
            ..Default::default()
        };

        self.api.set_peer(&self.iface, &info)?;
        log::info!("registered peer {} ({}) at {}", peer.id, peer.name, peer.address);

        self.persist();
        Ok(())
    }

    fn deactivate(&self, public_key: &Key) -> Result<(), Self::Error> {
        self.api.remove_peer(&self.iface, public_key)?;
        log::info!("deregistered peer key {public_key}");

        self.persist();
        Ok(())
    }
}
