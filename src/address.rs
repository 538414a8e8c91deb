//! Private-network address pool for the guest's host-only adapter.
//!
//! Six /24 subnets are reserved. In each one the host-side interface takes
//! `.1` and the guest takes `.11`; every guest IP maps to a fixed DNS domain.

use crate::driver::Driver;
use crate::error::PcfDevError;
use crate::network::NetworkInterface;

/// Host-side interface (gateway) addresses, in allocation order.
pub const ALLOWED_SUBNETS: [&str; 6] = [
    "192.168.11.1",
    "192.168.22.1",
    "192.168.33.1",
    "192.168.44.1",
    "192.168.55.1",
    "192.168.66.1",
];

const ALLOWED_IPS: [(&str, &str); 6] = [
    ("192.168.11.11", "local.pcfdev.io"),
    ("192.168.22.11", "local2.pcfdev.io"),
    ("192.168.33.11", "local3.pcfdev.io"),
    ("192.168.44.11", "local4.pcfdev.io"),
    ("192.168.55.11", "local5.pcfdev.io"),
    ("192.168.66.11", "local6.pcfdev.io"),
];

/// The DNS domain served for a guest IP.
pub fn domain_for_ip(ip: &str) -> Result<String, PcfDevError> {
    ALLOWED_IPS
        .iter()
        .find(|(allowed, _)| *allowed == ip)
        .map(|(_, domain)| domain.to_string())
        .ok_or_else(|| PcfDevError::NotAllowedIp { ip: ip.to_string() })
}

/// The host-side gateway address for a guest IP: `192.168.22.11` → `192.168.22.1`.
pub fn subnet_for_ip(ip: &str) -> Result<String, PcfDevError> {
    domain_for_ip(ip)?;
    let (prefix, _) = ip
        .rsplit_once('.')
        .ok_or_else(|| PcfDevError::NotAllowedIp { ip: ip.to_string() })?;
    Ok(format!("{prefix}.1"))
}

/// The guest IP inside the subnet of a gateway address: `192.168.22.1` → `192.168.22.11`.
pub fn ip_for_subnet(subnet_ip: &str) -> Result<String, PcfDevError> {
    let ip = subnet_ip
        .rsplit_once('.')
        .map(|(prefix, _)| format!("{prefix}.11"))
        .ok_or_else(|| PcfDevError::NotAllowedIp {
            ip: subnet_ip.to_string(),
        })?;
    domain_for_ip(&ip)?;
    Ok(ip)
}

/// Pick the first gateway address from the pool that a new VM may use.
///
/// A pool address carried by an existing hypervisor interface is available
/// only while that interface is attached to no VM. A pool address not carried
/// by any hypervisor interface is available unless some other host interface
/// already holds it.
pub async fn select_available_ip<D: Driver>(
    driver: &D,
    vboxnets: &[NetworkInterface],
    host_interfaces: &[NetworkInterface],
) -> Result<String, PcfDevError> {
    for subnet_ip in ALLOWED_SUBNETS {
        if let Some(vboxnet) = vboxnets.iter().find(|i| i.ip == subnet_ip) {
            if !driver.is_interface_in_use(&vboxnet.name).await? {
                tracing::debug!(ip = subnet_ip, interface = %vboxnet.name, "reusing idle host-only interface");
                return Ok(subnet_ip.to_string());
            }
        } else if !host_interfaces.iter().any(|i| i.ip == subnet_ip) {
            tracing::debug!(ip = subnet_ip, "subnet unused on host");
            return Ok(subnet_ip.to_string());
        }
    }
    Err(PcfDevError::NoAvailableInterface)
}
