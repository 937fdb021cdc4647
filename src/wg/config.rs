use std::{
    fmt,
    net::{AddrParseError, IpAddr},
    num::ParseIntError,
    result::Result,
    str::FromStr,
};

use super::{Cidr, DecodeError, Endpoint, Key};

/// A `wg-quick` style configuration file.
///
/// Parsing is lenient about unknown keys; rendering emits the known keys in a
/// fixed order so that generated client files are byte-stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgConfig {
    pub interface: WgConfigInterface,
    pub peers: Vec<WgConfigPeer>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WgConfigInterface {
    // PrivateKey
    pub private_key: Key,

    // Address
    pub address: Cidr,

    // DNS
    pub dns: Option<Vec<IpAddr>>,

    // MTU
    pub mtu: Option<u16>,

    // ListenPort
    pub listen_port: Option<u16>,

    // Table
    pub table: Option<u32>,

    // FwMark
    pub fwmark: Option<u32>,

    // PreUp
    pub pre_up: Option<String>,

    // PreDown
    pub pre_down: Option<String>,

    // PostUp
    pub post_up: Option<String>,

    // PostDown
    pub post_down: Option<String>,

    // SaveConfig
    pub save_config: Option<bool>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WgConfigPeer {
    // PublicKey
    pub public_key: Key,

    // PresharedKey
    pub preshared_key: Option<Key>,

    // Endpoint
    pub endpoint: Option<Endpoint>,

    // AllowedIPs
    pub allowed_ips: Option<Vec<Cidr>>,

    // PersistentKeepalive
    pub persistent_keepalive: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected token")]
    UnexpectedToken,

    #[error("key parse error: {0}")]
    KeyParseError(#[from] DecodeError),

    #[error("addr parse error: {0}")]
    SocketAddrParseError(#[from] AddrParseError),

    #[error("int parse error: {0}")]
    ParseIntError(#[from] ParseIntError),

    #[error("bool parse error: {0}")]
    ParseBoolError(#[from] std::str::ParseBoolError),

    #[error("no interface section")]
    NoIntrerfaceSection,

    #[error("wrong peer format")]
    PeerParseError,
}

impl WgConfigInterface {
    fn parse(input: &mut &str) -> Result<Self, ParseError> {
        if !input.starts_with("[Interface]") {
            return Err(ParseError::UnexpectedToken);
        }

        let _ = until::<Stub>('\n', input);

        let mut iface = WgConfigInterface::default();
        while !input.is_empty() && !input.trim_start().starts_with("[Peer]") {
            match until('=', input)? {
                WgPropKind::PrivateKey => iface.private_key = until('\n', input)?,
                WgPropKind::Address => iface.address = until('\n', input)?,
                WgPropKind::ListenPort => iface.listen_port = Some(until('\n', input)?),
                WgPropKind::FWMark => iface.fwmark = Some(until('\n', input)?),
                WgPropKind::MTU => iface.mtu = Some(until('\n', input)?),
                WgPropKind::DNS => iface.dns = Some(until::<List<IpAddr>>('\n', input)?.0),
                WgPropKind::Table => iface.table = Some(until('\n', input)?),
                WgPropKind::PostUp => iface.post_up = Some(until::<Str>('\n', input)?.0),
                WgPropKind::PostDown => iface.post_down = Some(until::<Str>('\n', input)?.0),
                WgPropKind::PreUp => iface.pre_up = Some(until::<Str>('\n', input)?.0),
                WgPropKind::PreDown => iface.pre_down = Some(until::<Str>('\n', input)?.0),
                WgPropKind::SaveConfig => iface.save_config = Some(until('\n', input)?),
                _ => _ = until::<Stub>('\n', input)?,
            }
        }

        Ok(iface)
    }
}

impl WgConfigPeer {
    fn parse(input: &mut &str) -> Result<Self, ParseError> {
        if !input.trim_start().starts_with("[Peer]") {
            return Err(ParseError::UnexpectedToken);
        }

        let _ = until::<Stub>('\n', input);

        let mut peer = WgConfigPeer::default();
        while !input.is_empty() && !input.trim_start().starts_with("[Peer]") {
            match until('=', input)? {
                WgPropKind::PublicKey => peer.public_key = until('\n', input)?,
                WgPropKind::PresharedKey => peer.preshared_key = Some(until('\n', input)?),
                WgPropKind::Endpoint => peer.endpoint = Some(until('\n', input)?),
                WgPropKind::AllowedIPs => {
                    peer.allowed_ips = Some(until::<List<Cidr>>('\n', input)?.0)
                }
                WgPropKind::PersistentKeepalive => {
                    peer.persistent_keepalive = Some(until('\n', input)?)
                }
                _ => _ = until::<Stub>('\n', input)?,
            }
        }

        Ok(peer)
    }
}

struct Stub;
impl FromStr for Stub {
    type Err = ParseError;
    fn from_str(_: &str) -> Result<Self, Self::Err> {
        Ok(Stub)
    }
}

struct Str(String);
impl FromStr for Str {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Str(s.to_string()))
    }
}

struct List<I>(Vec<I>);
impl<I: FromStr> FromStr for List<I> {
    type Err = I::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut items = Vec::new();

        for s in s.split(',') {
            items.push(s.trim().parse()?);
        }

        Ok(List(items))
    }
}

enum WgPropKind {
    PublicKey,
    PresharedKey,
    Endpoint,
    AllowedIPs,
    PersistentKeepalive,
    Unknown,
    PrivateKey,
    Address,
    ListenPort,
    PostUp,
    PostDown,
    PreUp,
    PreDown,
    FWMark,
    Table,
    MTU,
    DNS,
    SaveConfig,
}

impl FromStr for WgPropKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PublicKey" => WgPropKind::PublicKey,
            "PresharedKey" => WgPropKind::PresharedKey,
            "Endpoint" => WgPropKind::Endpoint,
            "AllowedIPs" => WgPropKind::AllowedIPs,
            "PersistentKeepalive" => WgPropKind::PersistentKeepalive,
            "PrivateKey" => WgPropKind::PrivateKey,
            "ListenPort" => WgPropKind::ListenPort,
            "PostUp" => WgPropKind::PostUp,
            "PostDown" => WgPropKind::PostDown,
            "PreUp" => WgPropKind::PreUp,
            "PreDown" => WgPropKind::PreDown,
            "FwMark" | "Fwmark" => WgPropKind::FWMark,
            "DNS" => WgPropKind::DNS,
            "MTU" => WgPropKind::MTU,
            "Address" => WgPropKind::Address,
            "Table" => WgPropKind::Table,
            "SaveConfig" => WgPropKind::SaveConfig,
            _ => WgPropKind::Unknown,
        })
    }
}

fn until<M: FromStr>(p: char, input: &mut &str) -> Result<M, M::Err> {
    let eol = input.find(p);
    let cnt = eol.unwrap_or(input.len());
    let res = input[0..cnt].trim().parse()?;
    *input = &input[cnt..];

    if !input.is_empty() {
        *input = &input[p.len_utf8()..];
    }

    Ok(res)
}

impl WgConfig {
    pub fn parse_config(input: &mut &str) -> Result<Self, ParseError> {
        let mut interface = None;
        let mut peers = Vec::new();

        while !input.is_empty() {
            if input.starts_with("[Interface]") {
                interface = Some(WgConfigInterface::parse(input)?);
            } else if input.starts_with("[Peer]") {
                peers.push(WgConfigPeer::parse(input)?);
            } else {
                let _ = until::<Stub>('\n', input);
            }
        }

        Ok(WgConfig {
            interface: interface.ok_or(ParseError::NoIntrerfaceSection)?,
            peers,
        })
    }
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

impl fmt::Display for WgConfigInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Interface]")?;
        writeln!(f, "PrivateKey = {}", self.private_key)?;
        writeln!(f, "Address = {}", self.address)?;

        if let Some(dns) = self.dns.as_deref().filter(|d| !d.is_empty()) {
            writeln!(f, "DNS = {}", join(dns, ","))?;
        }
        if let Some(mtu) = self.mtu {
            writeln!(f, "MTU = {mtu}")?;
        }
        if let Some(port) = self.listen_port {
            writeln!(f, "ListenPort = {port}")?;
        }
        if let Some(table) = self.table {
            writeln!(f, "Table = {table}")?;
        }
        if let Some(fwmark) = self.fwmark {
            writeln!(f, "FwMark = {fwmark}")?;
        }
        if let Some(cmd) = &self.pre_up {
            writeln!(f, "PreUp = {cmd}")?;
        }
        if let Some(cmd) = &self.post_up {
            writeln!(f, "PostUp = {cmd}")?;
        }
        if let Some(cmd) = &self.pre_down {
            writeln!(f, "PreDown = {cmd}")?;
        }
        if let Some(cmd) = &self.post_down {
            writeln!(f, "PostDown = {cmd}")?;
        }
        if let Some(save) = self.save_config {
            writeln!(f, "SaveConfig = {save}")?;
        }

        Ok(())
    }
}

impl fmt::Display for WgConfigPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Peer]")?;
        writeln!(f, "PublicKey = {}", self.public_key)?;

        if let Some(psk) = &self.preshared_key {
            writeln!(f, "PresharedKey = {psk}")?;
        }
        if let Some(endpoint) = &self.endpoint {
            writeln!(f, "Endpoint = {endpoint}")?;
        }
        if let Some(ips) = self.allowed_ips.as_deref().filter(|i| !i.is_empty()) {
            writeln!(f, "AllowedIPs = {}", join(ips, ", "))?;
        }
        if let Some(keepalive) = self.persistent_keepalive {
            writeln!(f, "PersistentKeepalive = {keepalive}")?;
        }

        Ok(())
    }
}

impl fmt::Display for WgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.interface)?;

        for peer in &self.peers {
            writeln!(f)?;
            write!(f, "{peer}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::wg::{
        Endpoint, Key,
        config::{Cidr, WgConfigInterface, WgConfigPeer},
    };

    use super::WgConfig;

    #[test]
    fn test_parse_config() {
        let priv_key = Key::random();
        let srv_key = Key::random();
        let laptop_key = Key::random();
        let phone_key = Key::random();

        let cfg = format!(
            "[Interface]
PrivateKey = {}
Address = 10.0.0.1/24
ListenPort = 51820
FwMark = 51820
PostUp = iptables -A FORWARD -i %i -j ACCEPT; iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE
PostDown = iptables -D FORWARD -i %i -j ACCEPT; iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE
SaveConfig = true

[Peer] # Upstream
PublicKey = {}
Endpoint = vpn.example.com:51820
AllowedIPs = 10.0.0.0/24, 192.168.1.1
PersistentKeepalive = 25

[Peer] # Laptop
PublicKey = {}
AllowedIPs = 10.0.0.2

[Peer] # Phone
PublicKey = {}
AllowedIPs = 10.0.0.3/32",
            priv_key, srv_key, laptop_key, phone_key,
        );

        let mut input = cfg.as_str();

        let cfg = WgConfig::parse_config(&mut input).unwrap();

        assert_eq!(
            cfg.interface,
            WgConfigInterface {
                private_key: priv_key,
                address: Cidr {
                    ip: Ipv4Addr::new(10, 0, 0, 1).into(),
                    mask: 24
                },
                listen_port: Some(51820),
                fwmark: Some(51820),
                post_up: Some("iptables -A FORWARD -i %i -j ACCEPT; iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE".to_string()),
                post_down: Some("iptables -D FORWARD -i %i -j ACCEPT; iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE".to_string()),
                save_config: Some(true),
                ..Default::default()
            }
        );

        assert_eq!(cfg.peers.len(), 3);
        assert_eq!(
            cfg.peers[0],
            WgConfigPeer {
                public_key: srv_key,
                preshared_key: None,
                endpoint: Some(Endpoint::Domain("vpn.example.com:51820".to_string())),
                allowed_ips: Some(vec![
                    Cidr {
                        ip: Ipv4Addr::new(10, 0, 0, 0).into(),
                        mask: 24
                    },
                    Cidr {
                        ip: Ipv4Addr::new(192, 168, 1, 1).into(),
                        mask: 32
                    },
                ]),
                persistent_keepalive: Some(25),
            }
        );
        assert_eq!(cfg.peers[1].public_key, laptop_key);
        assert_eq!(
            cfg.peers[1].allowed_ips,
            Some(vec![Cidr {
                ip: Ipv4Addr::new(10, 0, 0, 2).into(),
                mask: 32
            }])
        );
        assert_eq!(cfg.peers[2].public_key, phone_key);
    }

    #[test]
    fn rendered_config_parses_back() {
        let cfg = WgConfig {
            interface: WgConfigInterface {
                private_key: Key::random(),
                address: "10.0.0.9/32".parse().unwrap(),
                dns: Some(vec![
                    Ipv4Addr::new(1, 1, 1, 1).into(),
                    Ipv4Addr::new(8, 8, 8, 8).into(),
                ]),
                mtu: Some(1420),
                ..Default::default()
            },
            peers: vec![WgConfigPeer {
                public_key: Key::random(),
                preshared_key: Some(Key::random()),
                endpoint: Some("vpn.example.com:51820".parse().unwrap()),
                allowed_ips: Some(vec!["0.0.0.0/0".parse().unwrap(), "::/0".parse().unwrap()]),
                persistent_keepalive: Some(25),
            }],
        };

        let text = cfg.to_string();
        let mut input = text.as_str();
        assert_eq!(WgConfig::parse_config(&mut input).unwrap(), cfg);
    }
}
