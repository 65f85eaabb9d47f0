//! Local topology detection

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use camscout_core::NetworkInfo;
use ipnetwork::{ipv4_mask_to_prefix, Ipv4Network};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use tracing::{debug, info, warn};

use crate::errors::NetworkError;

/// Subnets wider than this are narrowed to the /24 around the local address
pub const WIDEST_SCAN_PREFIX: u8 = 22;

const FALLBACK_PREFIX: u8 = 24;

/// An IPv4 address bound to an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub interface: String,
    pub ip: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
}

pub struct NetworkAnalyzer {
    route_probe: SocketAddr,
}

impl Default for NetworkAnalyzer {
    fn default() -> Self {
        Self {
            route_probe: SocketAddr::from(([8, 8, 8, 8], 80)),
        }
    }
}

impl NetworkAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the OS network state and pick the interface the default route
    /// leaves through
    pub fn analyze(&self) -> Result<NetworkInfo, NetworkError> {
        let interfaces = NetworkInterface::show().map_err(|e| {
            warn!(error = %e, "Failed to enumerate network interfaces");
            NetworkError::NoActiveInterface
        })?;

        let candidates = ipv4_candidates(&interfaces);
        let routed = self.routed_source_ip();
        debug!(candidates = candidates.len(), routed = ?routed, "Interface candidates");

        let chosen = select_candidate(&candidates, routed).ok_or(NetworkError::NoActiveInterface)?;
        let subnet = scan_subnet(chosen.ip, chosen.netmask);
        let gateway = std::fs::read_to_string("/proc/net/route")
            .ok()
            .and_then(|table| parse_default_gateway(&table, &chosen.interface));

        info!(
            interface = %chosen.interface,
            local_ip = %chosen.ip,
            subnet = %subnet,
            gateway = ?gateway,
            "Network analyzed"
        );

        Ok(NetworkInfo {
            local_ip: chosen.ip,
            subnet,
            gateway,
            interface: chosen.interface.clone(),
        })
    }

    /// Source address the kernel would use to reach the probe target. UDP
    /// connect sends nothing.
    fn routed_source_ip(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(self.route_probe).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

pub fn ipv4_candidates(interfaces: &[NetworkInterface]) -> Vec<InterfaceAddr> {
    interfaces
        .iter()
        .flat_map(|iface| {
            iface.addr.iter().filter_map(move |addr| match addr {
                Addr::V4(v4) => Some(InterfaceAddr {
                    interface: iface.name.clone(),
                    ip: v4.ip,
                    netmask: v4.netmask,
                }),
                Addr::V6(_) => None,
            })
        })
        .collect()
}

/// Prefer the interface holding the routed source address, then the first
/// usable one
pub fn select_candidate(candidates: &[InterfaceAddr], routed: Option<Ipv4Addr>) -> Option<&InterfaceAddr> {
    let usable = |c: &&InterfaceAddr| !c.ip.is_loopback() && !c.ip.is_link_local() && !c.ip.is_unspecified();

    routed
        .and_then(|ip| candidates.iter().filter(usable).find(|c| c.ip == ip))
        .or_else(|| candidates.iter().find(usable))
}

/// The range to scan for `ip` with `netmask`
pub fn scan_subnet(ip: Ipv4Addr, netmask: Option<Ipv4Addr>) -> Ipv4Network {
    let prefix = netmask
        .and_then(|mask| ipv4_mask_to_prefix(mask).ok())
        .filter(|p| *p >= WIDEST_SCAN_PREFIX && *p <= 32)
        .unwrap_or(FALLBACK_PREFIX);

    match Ipv4Network::new(ip, prefix) {
        Ok(net) => Ipv4Network::new(net.network(), prefix).unwrap_or(net),
        Err(_) => Ipv4Network::from(ip),
    }
}

/// Default gateway for `interface` from a Linux `/proc/net/route` table
pub fn parse_default_gateway(table: &str, interface: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] != interface || fields[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        let gw = Ipv4Addr::from(raw.to_le_bytes());
        (!gw.is_unspecified()).then_some(gw)
    })
}
