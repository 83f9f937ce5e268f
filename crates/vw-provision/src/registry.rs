//! Client name and address allocation

use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;

use vw_core::ProvisionError;

use crate::render::address_host;

/// Offset of the first client address within a subnet
const FIRST_CLIENT_OFFSET: u32 = 2;

/// Lowest `client<N>` name, N from 1, not in `existing`
pub fn next_client_name<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: HashSet<&str> = existing.into_iter().collect();
    (1u32..)
        .map(|n| format!("client{}", n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| "client1".to_string())
}

/// Parse the server address of an interface, e.g. `10.10.0.1/24`
pub fn parse_subnet(cidr: &str) -> Result<Ipv4Net, ProvisionError> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map_err(|e| ProvisionError::InvalidConfig(format!("bad subnet '{}': {}", cidr, e)))
}

/// Normalize a client address to `a.b.c.d/prefix`, defaulting to `/32`
pub fn parse_client_address(value: &str) -> Result<String, ProvisionError> {
    let value = value.trim();
    let bad = |e: &dyn std::fmt::Display| {
        ProvisionError::InvalidConfig(format!("bad client address '{}': {}", value, e))
    };
    if value.contains('/') {
        let net: Ipv4Net = value.parse().map_err(|e| bad(&e))?;
        Ok(net.to_string())
    } else {
        let addr: Ipv4Addr = value.parse().map_err(|e| bad(&e))?;
        Ok(format!("{}/32", addr))
    }
}

/// Host addresses named by `Address = ...` lines in client configs
pub fn used_addresses(configs: &str) -> HashSet<Ipv4Addr> {
    configs
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.trim() != "Address" {
                return None;
            }
            address_host(value).parse().ok()
        })
        .collect()
}

/// First free `/32` in `subnet` from offset 2 upward
///
/// Skips the network address, offset 1, the server's own address, the
/// broadcast address and every address in `used`.
pub fn allocate_address(
    subnet: Ipv4Net,
    used: &HashSet<Ipv4Addr>,
) -> Result<String, ProvisionError> {
    let network = u32::from(subnet.network());
    let broadcast = u32::from(subnet.broadcast());
    let server = subnet.addr();

    let start = network.saturating_add(FIRST_CLIENT_OFFSET);
    (start..broadcast)
        .map(Ipv4Addr::from)
        .find(|addr| *addr != server && !used.contains(addr))
        .map(|addr| format!("{}/32", addr))
        .ok_or_else(|| ProvisionError::NoFreeAddresses(subnet.to_string()))
}
