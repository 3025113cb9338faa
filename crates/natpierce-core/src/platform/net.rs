//! Local address discovery.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

const PROBE_TARGET: &str = "8.8.8.8:53";

/// Interfaces whose IPv4 address is reported first, in order.
const PREFERRED_INTERFACES: &[&str] = &["wlan0", "eth0"];

/// Address the core is reachable on.
///
/// Wireless, then wired, then whatever interface carries outbound traffic.
/// Falls back to loopback when nothing is configured.
pub fn local_ip() -> IpAddr {
    if let Some(ip) = preferred_interface_ip() {
        return ip;
    }
    outbound_ip()
}

#[cfg(unix)]
fn preferred_interface_ip() -> Option<IpAddr> {
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Failed to list interfaces: {}", e);
            return None;
        }
    };

    let found = addrs.filter_map(|ifaddr| {
        let sin = ifaddr.address.as_ref()?.as_sockaddr_in()?;
        Some((ifaddr.interface_name.clone(), Ipv4Addr::from(sin.ip())))
    });
    pick_preferred(found)
}

#[cfg(not(unix))]
fn preferred_interface_ip() -> Option<IpAddr> {
    None
}

/// First preferred interface (by [`PREFERRED_INTERFACES`] order) with an address.
fn pick_preferred(found: impl IntoIterator<Item = (String, Ipv4Addr)>) -> Option<IpAddr> {
    let found: Vec<_> = found.into_iter().collect();
    PREFERRED_INTERFACES.iter().find_map(|wanted| {
        found
            .iter()
            .find(|(name, ip)| name == wanted && !ip.is_unspecified())
            .map(|(name, ip)| {
                debug!("Using {} address {}", name, ip);
                IpAddr::V4(*ip)
            })
    })
}

/// Connecting a UDP socket sends nothing; it only asks the kernel to pick a
/// route.
fn outbound_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(PROBE_TARGET)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("No outbound route, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
