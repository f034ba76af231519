use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use chrono::Utc;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use sysinfo::Networks;
use tracing::error;

use crate::error::{ProbeError, Result};

use super::{Collector, Metric};

/// One network interface and every address bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
    pub addrs: Vec<IpAddr>,
}

/// Lists interfaces in the order the kernel reports them.
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>> {
    let mut interfaces: Vec<InterfaceInfo> = Vec::new();

    for ifaddr in getifaddrs().map_err(|e| ProbeError::Io(e.into()))? {
        let index = match interfaces.iter().position(|i| i.name == ifaddr.interface_name) {
            Some(index) => index,
            None => {
                interfaces.push(InterfaceInfo {
                    name: ifaddr.interface_name.clone(),
                    up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
                    loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                    addrs: Vec::new(),
                });
                interfaces.len() - 1
            }
        };

        let addr = ifaddr.address.as_ref().and_then(|addr| {
            addr.as_sockaddr_in()
                .map(|sin| IpAddr::V4(sin.ip()))
                .or_else(|| addr.as_sockaddr_in6().map(|sin6| IpAddr::V6(sin6.ip())))
        });
        if let Some(addr) = addr {
            interfaces[index].addrs.push(addr);
        }
    }

    Ok(interfaces)
}

pub fn has_interface_prefix(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

/// Up, non-loopback interfaces whose name starts with one of `prefixes`.
pub fn select_interfaces<'a>(
    interfaces: &'a [InterfaceInfo],
    prefixes: &'a [String],
) -> impl Iterator<Item = &'a InterfaceInfo> + 'a {
    interfaces
        .iter()
        .filter(move |i| i.up && !i.loopback && has_interface_prefix(&i.name, prefixes))
}

fn usable_ipv4(addr: &IpAddr) -> Option<Ipv4Addr> {
    let v4 = match addr {
        IpAddr::V4(v4) => *v4,
        IpAddr::V6(v6) => v6.to_ipv4_mapped()?,
    };
    // 127/8, 169.254/16, 224/4
    if v4.is_loopback() || v4.is_link_local() || v4.is_multicast() {
        return None;
    }
    Some(v4)
}

/// `(interface, address)` for every routable IPv4 address on the selected
/// interfaces.
pub fn select_addresses(interfaces: &[InterfaceInfo], prefixes: &[String]) -> Vec<(String, Ipv4Addr)> {
    select_interfaces(interfaces, prefixes)
        .flat_map(|iface| {
            iface
                .addrs
                .iter()
                .filter_map(usable_ipv4)
                .map(move |addr| (iface.name.clone(), addr))
        })
        .collect()
}

pub struct NetworkCollector {
    prefixes: Vec<String>,
    networks: Networks,
}

impl NetworkCollector {
    pub fn new(prefixes: Vec<String>) -> Self {
        NetworkCollector {
            prefixes,
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    async fn collect(&mut self) -> Vec<Metric> {
        let interfaces = match list_interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                error!("failed to list network interfaces: {e}");
                return Vec::new();
            }
        };

        self.networks.refresh(true);
        let timestamp = Utc::now().timestamp();
        let mut metrics = Vec::new();

        for (interface, addr) in select_addresses(&interfaces, &self.prefixes) {
            metrics.push(Metric {
                name: "network_address".to_string(),
                value: 1.0,
                timestamp,
                tags: vec![
                    ("interface".to_string(), interface),
                    ("address".to_string(), addr.to_string()),
                ],
            });
        }

        for iface in select_interfaces(&interfaces, &self.prefixes) {
            let Some(data) = self.networks.list().get(&iface.name) else {
                continue;
            };
            let tags = vec![("interface".to_string(), iface.name.clone())];
            metrics.push(Metric {
                name: "network_received".to_string(),
                value: data.total_received() as f64,
                timestamp,
                tags: tags.clone(),
            });
            metrics.push(Metric {
                name: "network_transmitted".to_string(),
                value: data.total_transmitted() as f64,
                timestamp,
                tags: tags.clone(),
            });
            metrics.push(Metric {
                name: "network_packets_received".to_string(),
                value: data.total_packets_received() as f64,
                timestamp,
                tags: tags.clone(),
            });
            metrics.push(Metric {
                name: "network_packets_transmitted".to_string(),
                value: data.total_packets_transmitted() as f64,
                timestamp,
                tags,
            });
        }

        metrics
    }
}
