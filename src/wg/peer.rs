use std::str::FromStr;

use super::{Cidr, Endpoint, Key, config::ParseError, instance::optional};

/// Peer row of `wg show <iface> dump`, also used to register a peer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WgPeerInfo {
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

    // LatestHandshake, epoch seconds
    pub latest_handshake: Option<u64>,

    // Transfer (rx, tx)
    pub transfer: Option<(u64, u64)>,
}

impl FromStr for WgPeerInfo {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim().split('\t').collect();

        let [
            public_key,
            preshared_key,
            endpoint,
            allowed_ips,
            latest_handshake,
            rx,
            tx,
            persistent_keepalive,
        ] = fields.as_slice()
        else {
            return Err(ParseError::PeerParseError);
        };

        let allowed_ips = match allowed_ips.trim() {
            "" | "(none)" => None,
            list => Some(
                list.split(',')
                    .map(str::parse)
                    .collect::<Result<Vec<Cidr>, _>>()?,
            ),
        };

        Ok(WgPeerInfo {
            public_key: public_key.trim().parse()?,
            preshared_key: optional(preshared_key)?,
            endpoint: optional(endpoint)?,
            allowed_ips,
            persistent_keepalive: optional(persistent_keepalive)?,
            latest_handshake: optional(latest_handshake)?,
            transfer: Some((rx.trim().parse()?, tx.trim().parse()?)),
        })
    }
}
