use std::{
    io::Write,
    process::{Command, Stdio},
    str::FromStr,
};

use crate::error::Error;

use super::{Key, WgState, WireguardApi, config::ParseError, peer::WgPeerInfo};

const WG: &str = "wg";
const WG_QUICK: &str = "wg-quick";

/// Drives the daemon through the `wg` and `wg-quick` tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct WgCmdBackend;

impl WgCmdBackend {
    pub(crate) fn new() -> Self {
        Self
    }

    fn run(program: &str, args: &[&str], stdin: Option<&str>) -> Result<String, Error> {
        log::debug!("running {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())?;
        }

        let out = child.wait_with_output()?;

        if !out.status.success() {
            log::debug!(
                "{program} failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
            return Err(Error::WgCommandFail(out.status.code()));
        }

        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn key(out: &str) -> Result<Key, Error> {
        Ok(Key::from_str(out.trim()).map_err(ParseError::from)?)
    }
}

impl WireguardApi for WgCmdBackend {
    type Error = Error;

    fn generate_private_key(&self) -> Result<Key, Self::Error> {
        Self::key(&Self::run(WG, &["genkey"], None)?)
    }

    fn public_key(&self, private_key: &Key) -> Result<Key, Self::Error> {
        let input = format!("{private_key}\n");
        Self::key(&Self::run(WG, &["pubkey"], Some(&input))?)
    }

    fn generate_preshared_key(&self) -> Result<Key, Self::Error> {
        Self::key(&Self::run(WG, &["genpsk"], None)?)
    }

    fn dump(&self, iface: &str) -> Result<WgState, Self::Error> {
        let out = Self::run(WG, &["show", iface, "dump"], None)?;
        Ok(WgState::parse_dump(&out)?)
    }

    fn set_peer(&self, iface: &str, peer: &WgPeerInfo) -> Result<(), Self::Error> {
        let key = peer.public_key.to_string();
        let allowed_ips = peer
            .allowed_ips
            .iter()
            .flatten()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut args = vec!["set", iface, "peer", key.as_str()];
        let psk = peer.preshared_key.map(|psk| format!("{psk}\n"));
        if psk.is_some() {
            args.extend(["preshared-key", "/dev/stdin"]);
        }
        args.extend(["allowed-ips", allowed_ips.as_str()]);

        Self::run(WG, &args, psk.as_deref()).map(drop)
    }

    fn remove_peer(&self, iface: &str, key: &Key) -> Result<(), Self::Error> {
        let key = key.to_string();
        Self::run(WG, &["set", iface, "peer", &key, "remove"], None).map(drop)
    }

    fn save_config(&self, iface: &str) -> Result<(), Self::Error> {
        Self::run(WG_QUICK, &["save", iface], None).map(drop)
    }

    fn is_installed(&self) -> bool {
        Self::run(WG, &["--version"], None).is_ok()
    }

    fn is_interface_up(&self, iface: &str) -> bool {
        Self::run(WG, &["show", iface], None).is_ok()
    }

    fn interface_up(&self, iface: &str) -> Result<(), Self::Error> {
        Self::run(WG_QUICK, &["up", iface], None).map(drop)
    }

    fn interface_down(&self, iface: &str) -> Result<(), Self::Error> {
        Self::run(WG_QUICK, &["down", iface], None).map(drop)
    }
}
