use std::str::FromStr;

use super::{Key, config::ParseError};

/// Interface row of `wg show <iface> dump`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WgInterfaceInfo {
    // PrivateKey
    pub private_key: Option<Key>,

    // PublicKey
    pub public_key: Option<Key>,

    // ListenPort
    pub listen_port: Option<u16>,

    // FwMark
    pub fwmark: Option<u32>,
}

impl FromStr for WgInterfaceInfo {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.trim().split('\t');
        let mut next = || fields.next().ok_or(ParseError::UnexpectedToken);

        Ok(WgInterfaceInfo {
            private_key: optional(next()?)?,
            public_key: optional(next()?)?,
            listen_port: optional(next()?)?,
            fwmark: optional(next()?)?,
        })
    }
}

/// Dump fields use `(none)`, `off` or `0` for "not set".
pub(super) fn optional<T>(field: &str) -> Result<Option<T>, ParseError>
where
    T: FromStr,
    ParseError: From<T::Err>,
{
    match field.trim() {
        "" | "(none)" | "off" | "0" => Ok(None),
        value => Ok(Some(value.parse()?)),
    }
}
