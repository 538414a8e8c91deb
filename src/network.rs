//! Host-side network interfaces.

use std::net::SocketAddrV4;

use crate::error::PcfDevError;

/// A host network adapter and the IPv4 address assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: String,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
        }
    }
}

/// Lists every IPv4-addressed interface on the host, hypervisor-managed or not.
pub trait HostNetwork {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>, PcfDevError>;
}

pub struct SystemNetwork;

impl HostNetwork for SystemNetwork {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>, PcfDevError> {
        let addrs = nix::ifaddrs::getifaddrs().map_err(|e| PcfDevError::Io {
            context: "listing host network interfaces".into(),
            source: std::io::Error::from(e),
        })?;

        Ok(addrs
            .filter_map(|ifaddr| {
                let sin = ifaddr.address.as_ref()?.as_sockaddr_in()?;
                let ip = SocketAddrV4::from(*sin).ip().to_string();
                Some(NetworkInterface::new(ifaddr.interface_name, ip))
            })
            .collect())
    }
}
