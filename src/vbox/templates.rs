//! Guest configuration file bodies.

use crate::address;
use crate::config::{Config, VmConfig};
use crate::error::PcfDevError;

const GUEST_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/usr/games:/usr/local/games";

/// Fields of `/etc/network/interfaces`.
#[derive(Debug, Clone)]
pub struct NetworkProperties<'a> {
    pub ip: &'a str,
}

/// Loopback, DHCP on the NAT uplink, and the static private address on eth1.
pub fn render_interfaces(props: &NetworkProperties<'_>) -> String {
    format!(
        "\nauto lo\niface lo inet loopback\n\nauto eth0\niface eth0 inet dhcp\n\nauto eth1\niface eth1 inet static\naddress {}\nnetmask 255.255.255.0",
        props.ip
    )
}

/// Fields of `/etc/environment`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

impl ProxySettings {
    /// Proxies as seen from the guest: the host loopback becomes the subnet
    /// gateway, and guest-local names bypass the proxy.
    pub fn for_guest(config: &Config, vm: &VmConfig) -> Result<Self, PcfDevError> {
        let gateway = address::subnet_for_ip(&vm.ip)?;

        let mut no_proxy = vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            gateway.clone(),
            vm.ip.clone(),
            vm.domain.clone(),
            format!(".{}", vm.domain),
        ];
        if !config.no_proxy.is_empty() {
            no_proxy.push(config.no_proxy.clone());
        }

        Ok(Self {
            http_proxy: config.http_proxy.replace("127.0.0.1", &gateway),
            https_proxy: config.https_proxy.replace("127.0.0.1", &gateway),
            no_proxy: no_proxy.join(","),
        })
    }
}

/// Both spellings of each variable; unset proxies leave an empty line.
pub fn render_environment(settings: &ProxySettings) -> String {
    let optional = |key: &str, value: &str| {
        if value.is_empty() {
            String::new()
        } else {
            format!("{key}={value}")
        }
    };
    format!(
        "\nPATH={GUEST_PATH}\n{}\n{}\nNO_PROXY={no}\n{}\n{}\nno_proxy={no}",
        optional("HTTP_PROXY", &settings.http_proxy),
        optional("HTTPS_PROXY", &settings.https_proxy),
        optional("http_proxy", &settings.http_proxy),
        optional("https_proxy", &settings.https_proxy),
        no = settings.no_proxy,
    )
}
