use std::{collections::HashSet, net::IpAddr};

use ipnet::IpNet;

use crate::{error::Error, wg::Cidr};

/// Hands out the lowest free host address of a block.
///
/// Deterministic for a given used-set, so concurrent creations must either
/// be serialised or re-check the address when they commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAllocator {
    network: IpNet,
}

impl AddressAllocator {
    pub fn new(network: IpNet) -> Self {
        Self {
            network: network.trunc(),
        }
    }

    /// `used` must include the server's own address.
    pub fn allocate(&self, used: &HashSet<IpAddr>) -> Result<Cidr, Error> {
        let network = self.network.network();
        let broadcast = self.network.broadcast();

        self.network
            .hosts()
            .filter(|ip| *ip != network && *ip != broadcast)
            .find(|ip| !used.contains(ip))
            .map(Cidr::host)
            .ok_or(Error::AddressSpaceExhausted(self.network))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use quickcheck::{QuickCheck, TestResult};

    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        Ipv4Addr::new(a, b, c, d).into()
    }

    #[test]
    fn skips_server_and_used_addresses() {
        let alloc = AddressAllocator::new("10.0.0.0/24".parse().unwrap());
        let used: HashSet<IpAddr> = [v4(10, 0, 0, 1), v4(10, 0, 0, 2), v4(10, 0, 0, 4)].into();

        let cidr = alloc.allocate(&used).unwrap();
        assert_eq!(cidr.to_string(), "10.0.0.3/32");
    }

    #[test]
    fn lowest_free_address_first() {
        let alloc = AddressAllocator::new("10.0.0.0/24".parse().unwrap());
        let cidr = alloc.allocate(&HashSet::new()).unwrap();
        assert_eq!(cidr.ip, v4(10, 0, 0, 1));
    }

    #[test]
    fn block_with_host_bits_is_normalised() {
        let alloc = AddressAllocator::new("10.0.0.1/30".parse().unwrap());
        let used: HashSet<IpAddr> = [v4(10, 0, 0, 1)].into();
        assert_eq!(alloc.allocate(&used).unwrap().ip, v4(10, 0, 0, 2));
    }

    #[test]
    fn exhausted_when_every_host_is_used() {
        let alloc = AddressAllocator::new("192.168.5.0/29".parse().unwrap());
        let used: HashSet<IpAddr> = (1..=6).map(|d| v4(192, 168, 5, d)).collect();

        assert!(matches!(
            alloc.allocate(&used),
            Err(Error::AddressSpaceExhausted(_))
        ));
    }

    #[test]
    fn tiny_blocks_have_no_hosts() {
        for block in ["10.0.0.0/31", "10.0.0.7/32"] {
            let alloc = AddressAllocator::new(block.parse().unwrap());
            assert!(alloc.allocate(&HashSet::new()).is_err(), "{block}");
        }
    }

    #[test]
    fn ipv6_block() {
        let alloc = AddressAllocator::new("fd00::/120".parse().unwrap());
        let used: HashSet<IpAddr> = ["fd00::1".parse().unwrap()].into();
        assert_eq!(alloc.allocate(&used).unwrap().to_string(), "fd00::2/128");
    }

    #[test]
    fn allocation_properties() {
        // Arbitrary /26../30 block and an arbitrary subset of its addresses.
        fn prop(base: u32, prefix: u8, picks: Vec<u8>) -> TestResult {
            let prefix = 26 + prefix % 5;
            let net = IpNet::new(IpAddr::V4(Ipv4Addr::from(base)), prefix)
                .unwrap()
                .trunc();
            let alloc = AddressAllocator::new(net);

            let size = 1u32 << (32 - prefix);
            let first = u32::from(match net.network() {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(_) => return TestResult::discard(),
            });
            let used: HashSet<IpAddr> = picks
                .iter()
                .map(|p| IpAddr::V4(Ipv4Addr::from(first + u32::from(*p) % size)))
                .collect();
            let all_hosts_used = (1..size - 1)
                .all(|i| used.contains(&IpAddr::V4(Ipv4Addr::from(first + i))));

            match alloc.allocate(&used) {
                Ok(cidr) => TestResult::from_bool(
                    !all_hosts_used
                        && !used.contains(&cidr.ip)
                        && cidr.ip != net.network()
                        && cidr.ip != net.broadcast()
                        && net.contains(&cidr.ip)
                        && cidr.mask == 32,
                ),
                Err(Error::AddressSpaceExhausted(_)) => TestResult::from_bool(all_hosts_used),
                Err(_) => TestResult::failed(),
            }
        }

        QuickCheck::new()
            .tests(500)
            .quickcheck(prop as fn(u32, u8, Vec<u8>) -> TestResult);
    }
}
