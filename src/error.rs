use std::net::IpAddr;

use crate::{peer::PeerId, wg::config::ParseError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("wg cmd fail: {0:?}")]
    WgCommandFail(Option<i32>),

    #[error("encode error: {0}")]
    EncodeError(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    DecodeError(#[from] bincode::error::DecodeError),

    #[error("invalid network prefix: {0}")]
    InvalidPrefix(#[from] ipnet::PrefixLenError),

    #[error("no available addresses in {0}")]
    AddressSpaceExhausted(ipnet::IpNet),

    #[error("address {0} is already assigned")]
    AddressInUse(IpAddr),

    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    #[error("peer {0} was modified concurrently")]
    RevisionConflict(PeerId),

    #[error("server settings are not initialised")]
    SettingsMissing,

    #[error("server endpoint is not configured")]
    EndpointNotConfigured,
}
