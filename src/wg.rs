use base64::prelude::*;
use bincode::{Decode, Encode};
use config::ParseError;
use instance::WgInterfaceInfo;
use peer::WgPeerInfo;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};

pub mod cmd;
pub mod config;
#[cfg(test)]
pub mod fake;
pub mod instance;
pub mod peer;

pub type DecodeError = base64::DecodeSliceError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Key([u8; 32]);

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Key {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = [0u8; 32];
        BASE64_STANDARD.decode_slice(s, &mut inner)?;
        Ok(Key(inner))
    }
}

impl Key {
    pub fn random() -> Key {
        Key(rand::random())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", BASE64_STANDARD.encode(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Cidr {
    pub ip: IpAddr,
    pub mask: u8,
}

impl Default for Cidr {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            mask: 0,
        }
    }
}

impl Cidr {
    /// Single-host assignment (`/32` or `/128`).
    pub fn host(ip: IpAddr) -> Self {
        let mask = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        Cidr { ip, mask }
    }

    pub fn network(&self) -> Result<ipnet::IpNet, ipnet::PrefixLenError> {
        ipnet::IpNet::new(self.ip, self.mask)
    }
}

impl From<ipnet::IpNet> for Cidr {
    fn from(net: ipnet::IpNet) -> Self {
        Cidr {
            ip: net.addr(),
            mask: net.prefix_len(),
        }
    }
}

impl FromStr for Cidr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, mask) = s.split_once('/').unwrap_or((s, ""));
        let ip: IpAddr = ip.trim().parse()?;
        let mask = mask.trim();

        let mask: u8 = if !mask.is_empty() {
            mask.parse()?
        } else {
            Cidr::host(ip).mask
        };

        Ok(Cidr { ip, mask })
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ip, self.mask)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Domain(String),
    Ip(SocketAddr),
}

impl From<String> for Endpoint {
    fn from(v: String) -> Self {
        Self::Domain(v)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(v: SocketAddr) -> Self {
        Self::Ip(v)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Domain(dom) => write!(f, "{dom}"),
            Endpoint::Ip(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if let Ok(addr) = s.parse() {
            Self::Ip(addr)
        } else {
            Self::Domain(s.to_string())
        })
    }
}

/// Parsed `wg show <iface> dump`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WgState {
    pub interface: WgInterfaceInfo,
    pub peers: Vec<WgPeerInfo>,
}

impl WgState {
    /// The first line describes the interface, every following line one peer.
    pub fn parse_dump(dump: &str) -> Result<Self, ParseError> {
        let mut lines = dump.lines().filter(|l| !l.trim().is_empty());

        let interface = lines
            .next()
            .ok_or(ParseError::NoIntrerfaceSection)?
            .parse()?;

        let peers = lines.map(str::parse).collect::<Result<_, _>>()?;

        Ok(WgState { interface, peers })
    }
}

/// Command surface of the tunnel daemon.
pub trait WireguardApi {
    type Error;

    fn generate_private_key(&self) -> Result<Key, Self::Error>;
    fn public_key(&self, private_key: &Key) -> Result<Key, Self::Error>;
    fn generate_preshared_key(&self) -> Result<Key, Self::Error>;

    fn dump(&self, iface: &str) -> Result<WgState, Self::Error>;

    fn set_peer(&self, iface: &str, peer: &WgPeerInfo) -> Result<(), Self::Error>;
    fn remove_peer(&self, iface: &str, key: &Key) -> Result<(), Self::Error>;
    fn save_config(&self, iface: &str) -> Result<(), Self::Error>;

    fn is_installed(&self) -> bool;
    fn is_interface_up(&self, iface: &str) -> bool;
    fn interface_up(&self, iface: &str) -> Result<(), Self::Error>;
    fn interface_down(&self, iface: &str) -> Result<(), Self::Error>;
}
