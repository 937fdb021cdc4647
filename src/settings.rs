use std::{fs, net::IpAddr, path::Path};

use bincode::{Decode, Encode};
use ipnet::IpNet;

use crate::{
    error::Error,
    peer::Peer,
    wg::{
        Cidr, Key,
        config::{WgConfig, WgConfigInterface, WgConfigPeer},
    },
};

pub const DEFAULT_SERVER_NAME: &str = "WireGuard Panel";
pub const DEFAULT_MTU: u16 = 1420;
pub const DEFAULT_KEEPALIVE: u32 = 25;

/// Server-side tunnel settings, created once and then only changed by admins.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ServerConfig {
    pub server_name: String,
    pub interface: String,
    pub listen_port: u16,
    /// Address block peers are allocated from.
    pub network: Cidr,
    /// The server's own address inside `network`.
    pub server_address: Cidr,
    pub private_key: Key,
    pub public_key: Key,
    /// Externally reachable host name or address, without the port.
    pub endpoint: Option<String>,
    pub dns: Vec<IpAddr>,
    pub mtu: u16,
    pub persistent_keepalive: u32,
}

/// Inputs for first-start bootstrap, usually from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub interface: String,
    pub listen_port: u16,
    pub network: IpNet,
    pub dns: Vec<IpAddr>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub server_name: Option<String>,
    pub endpoint: Option<Option<String>>,
    pub listen_port: Option<u16>,
    pub dns: Option<Vec<IpAddr>>,
    pub mtu: Option<u16>,
    pub persistent_keepalive: Option<u32>,
}

impl ServerConfig {
    /// Builds fresh settings. An existing interface config is reused for the
    /// server key, address and port so that adopting a running server does not
    /// rotate its identity.
    pub fn bootstrap(
        boot: &Bootstrap,
        existing: Option<&WgConfigInterface>,
        keypair: impl FnOnce() -> (Key, Key),
        public_key_of: impl FnOnce(&Key) -> Key,
    ) -> Result<ServerConfig, Error> {
        let network = boot.network.trunc();

        let (private_key, public_key, server_address, listen_port) = match existing {
            Some(iface) => (
                iface.private_key,
                public_key_of(&iface.private_key),
                iface.address,
                iface.listen_port.unwrap_or(boot.listen_port),
            ),
            None => {
                let (private_key, public_key) = keypair();
                let first_host = network
                    .hosts()
                    .find(|ip| *ip != network.network())
                    .ok_or(Error::AddressSpaceExhausted(network))?;
                let server_address = Cidr {
                    ip: first_host,
                    mask: network.prefix_len(),
                };
                (private_key, public_key, server_address, boot.listen_port)
            }
        };

        Ok(ServerConfig {
            server_name: DEFAULT_SERVER_NAME.to_string(),
            interface: boot.interface.clone(),
            listen_port,
            network: network.into(),
            server_address,
            private_key,
            public_key,
            endpoint: boot.endpoint.clone(),
            dns: boot.dns.clone(),
            mtu: DEFAULT_MTU,
            persistent_keepalive: DEFAULT_KEEPALIVE,
        })
    }

    pub fn network(&self) -> Result<IpNet, Error> {
        Ok(self.network.network()?)
    }

    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(name) = update.server_name {
            self.server_name = name;
        }
        if let Some(endpoint) = update.endpoint {
            self.endpoint = endpoint.filter(|e| !e.trim().is_empty());
        }
        if let Some(port) = update.listen_port {
            self.listen_port = port;
        }
        if let Some(dns) = update.dns {
            self.dns = dns;
        }
        if let Some(mtu) = update.mtu {
            self.mtu = mtu;
        }
        if let Some(keepalive) = update.persistent_keepalive {
            self.persistent_keepalive = keepalive;
        }
    }

    /// Client-side config file for `peer`, routing everything through the tunnel.
    pub fn client_config(&self, peer: &Peer) -> Result<WgConfig, Error> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(Error::EndpointNotConfigured)?;

        Ok(WgConfig {
            interface: WgConfigInterface {
                private_key: peer.private_key,
                address: peer.address,
                dns: Some(self.dns.clone()),
                mtu: Some(self.mtu),
                ..Default::default()
            },
            peers: vec![WgConfigPeer {
                public_key: self.public_key,
                preshared_key: peer.preshared_key,
                endpoint: Some(format!("{endpoint}:{}", self.listen_port).into()),
                allowed_ips: Some(vec![
                    Cidr::default(),
                    Cidr {
                        ip: IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
                        mask: 0,
                    },
                ]),
                persistent_keepalive: Some(self.persistent_keepalive),
            }],
        })
    }
}

/// Reads the `[Interface]` section of an existing `wg-quick` config, if any.
pub fn read_interface_config(path: &Path) -> Result<Option<WgConfigInterface>, Error> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut reader = data.as_str();
    Ok(Some(WgConfig::parse_config(&mut reader)?.interface))
}
