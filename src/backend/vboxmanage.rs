//! `Driver` implemented by shelling out to `VBoxManage`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::{Driver, HypervisorState};
use crate::error::PcfDevError;
use crate::network::NetworkInterface;

/// Environment variable naming an alternative `VBoxManage` binary.
pub const VBOXMANAGE_ENV: &str = "PCFDEV_VBOXMANAGE";

const STOP_TIMEOUT: Duration = Duration::from_secs(120);

pub struct VBoxManage {
    binary: PathBuf,
}

impl VBoxManage {
    pub fn new() -> Self {
        let binary = std::env::var_os(VBOXMANAGE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("VBoxManage"));
        Self { binary }
    }

    async fn run(&self, args: &[&str]) -> Result<String, PcfDevError> {
        let command = args.join(" ");
        tracing::debug!(command, "VBoxManage");

        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| PcfDevError::Driver {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PcfDevError::Driver {
                command,
                message: format!("{}: {}{}", output.status, stdout.trim(), stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn vm_info(&self, name: &str) -> Result<BTreeMap<String, String>, PcfDevError> {
        let output = self.run(&["showvminfo", name, "--machinereadable"]).await?;
        Ok(parse_machine_readable(&output))
    }
}

impl Default for VBoxManage {
    fn default() -> Self {
        Self::new()
    }
}

// ── output parsing ────────────────────────────────────────

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Parse `key="value"` lines from `showvminfo --machinereadable`.
pub fn parse_machine_readable(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((unquote(key.trim()).to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

/// Parse `"name" {uuid}` lines from `list vms`.
pub fn parse_vm_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('"')?;
            let end = rest.rfind("\" {")?;
            Some(rest[..end].to_string())
        })
        .collect()
}

/// Parse `Location:` fields from `list hdds`.
pub fn parse_disk_list(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("Location:"))
        .map(|location| PathBuf::from(location.trim()))
        .collect()
}

/// Parse the `Name:` / `IPAddress:` pairs from `list hostonlyifs`.
pub fn parse_host_only_interfaces(output: &str) -> Vec<NetworkInterface> {
    let mut interfaces = Vec::new();
    let mut name: Option<String> = None;
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("Name:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("IPAddress:") {
            if let Some(name) = name.take() {
                interfaces.push(NetworkInterface::new(name, value.trim()));
            }
        }
    }
    interfaces
}

/// Parse the interface name out of `hostonlyif create` output.
pub fn parse_created_interface(output: &str) -> Option<String> {
    let start = output.find("Interface '")? + "Interface '".len();
    let end = output[start..].find('\'')?;
    Some(output[start..start + end].to_string())
}

/// Find the host port of a NAT forwarding rule: `Forwarding(0)="ssh,tcp,127.0.0.1,50051,,22"`.
pub fn find_forwarded_port(info: &BTreeMap<String, String>, rule: &str) -> Option<u16> {
    info.iter()
        .filter(|(key, _)| key.starts_with("Forwarding("))
        .find_map(|(_, value)| {
            let fields: Vec<&str> = value.split(',').collect();
            match fields.as_slice() {
                [name, _proto, _host_ip, host_port, ..] if *name == rule => {
                    host_port.parse().ok()
                }
                _ => None,
            }
        })
}

// ── driver ────────────────────────────────────────────────

impl Driver for VBoxManage {
    async fn create_vm(&self, name: &str, base_dir: &Path) -> Result<(), PcfDevError> {
        let base = base_dir.display().to_string();
        self.run(&[
            "createvm", "--name", name, "--ostype", "Ubuntu_64", "--basefolder", &base,
            "--register",
        ])
        .await?;
        Ok(())
    }

    async fn start_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.run(&["startvm", name, "--type", "headless"]).await?;
        Ok(())
    }

    async fn stop_vm(&self, name: &str) -> Result<(), PcfDevError> {
        tracing::info!(name, "sending ACPI shutdown");
        self.run(&["controlvm", name, "acpipowerbutton"]).await?;

        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        loop {
            if self.vm_state(name).await? != HypervisorState::Running {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        tracing::warn!(name, "ACPI shutdown timed out, powering off");
        self.power_off_vm(name).await
    }

    /// `controlvm poweroff` only works on a live VM; a saved one drops its state instead.
    async fn power_off_vm(&self, name: &str) -> Result<(), PcfDevError> {
        match self.vm_state(name).await? {
            HypervisorState::Stopped | HypervisorState::Aborted => {}
            HypervisorState::Saved => {
                self.run(&["discardstate", name]).await?;
            }
            _ => {
                self.run(&["controlvm", name, "poweroff"]).await?;
            }
        }
        Ok(())
    }

    async fn suspend_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.run(&["controlvm", name, "savestate"]).await?;
        Ok(())
    }

    async fn resume_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.run(&["controlvm", name, "resume"]).await?;
        Ok(())
    }

    async fn destroy_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.run(&["unregistervm", name, "--delete"]).await?;
        Ok(())
    }

    async fn vm_exists(&self, name: &str) -> Result<bool, PcfDevError> {
        Ok(self.vms().await?.iter().any(|vm| vm == name))
    }

    async fn vm_state(&self, name: &str) -> Result<HypervisorState, PcfDevError> {
        let info = self.vm_info(name).await?;
        let state = info.get("VMState").ok_or_else(|| PcfDevError::Driver {
            command: format!("showvminfo {name} --machinereadable"),
            message: "no VMState in output".into(),
        })?;
        Ok(HypervisorState::parse(state))
    }

    async fn vms(&self) -> Result<Vec<String>, PcfDevError> {
        Ok(parse_vm_list(&self.run(&["list", "vms"]).await?))
    }

    async fn disks(&self) -> Result<Vec<PathBuf>, PcfDevError> {
        Ok(parse_disk_list(&self.run(&["list", "hdds"]).await?))
    }

    async fn attach_disk(&self, name: &str, disk: &Path) -> Result<(), PcfDevError> {
        let disk = disk.display().to_string();
        self.run(&["storagectl", name, "--name", "SATA", "--add", "sata"])
            .await?;
        self.run(&[
            "storageattach", name, "--storagectl", "SATA", "--medium", &disk, "--type", "hdd",
            "--port", "0", "--device", "0",
        ])
        .await?;
        Ok(())
    }

    async fn clone_disk(&self, src: &Path, dest: &Path) -> Result<(), PcfDevError> {
        let src = src.display().to_string();
        let dest = dest.display().to_string();
        self.run(&["clonemedium", "disk", &src, &dest]).await?;
        Ok(())
    }

    async fn delete_disk(&self, disk: &Path) -> Result<(), PcfDevError> {
        let disk = disk.display().to_string();
        self.run(&["closemedium", "disk", &disk, "--delete"]).await?;
        Ok(())
    }

    async fn create_host_only_interface(&self, ip: &str) -> Result<String, PcfDevError> {
        let output = self.run(&["hostonlyif", "create"]).await?;
        let interface = parse_created_interface(&output).ok_or_else(|| PcfDevError::Driver {
            command: "hostonlyif create".into(),
            message: format!("unexpected output: {}", output.trim()),
        })?;
        self.configure_host_only_interface(&interface, ip).await?;
        tracing::info!(interface, ip, "created host-only interface");
        Ok(interface)
    }

    async fn configure_host_only_interface(
        &self,
        interface: &str,
        ip: &str,
    ) -> Result<(), PcfDevError> {
        self.run(&[
            "hostonlyif", "ipconfig", interface, "--ip", ip, "--netmask", "255.255.255.0",
        ])
        .await?;
        Ok(())
    }

    async fn attach_network_interface(
        &self,
        interface: &str,
        name: &str,
    ) -> Result<(), PcfDevError> {
        self.run(&[
            "modifyvm", name, "--nic2", "hostonly", "--hostonlyadapter2", interface,
        ])
        .await?;
        Ok(())
    }

    async fn get_host_only_interfaces(&self) -> Result<Vec<NetworkInterface>, PcfDevError> {
        Ok(parse_host_only_interfaces(
            &self.run(&["list", "hostonlyifs"]).await?,
        ))
    }

    async fn is_interface_in_use(&self, interface: &str) -> Result<bool, PcfDevError> {
        for vm in self.vms().await? {
            let info = self.vm_info(&vm).await?;
            let attached = info
                .iter()
                .any(|(key, value)| key.starts_with("hostonlyadapter") && value == interface);
            if attached {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn forward_port(
        &self,
        name: &str,
        rule: &str,
        host_port: u16,
        guest_port: u16,
    ) -> Result<(), PcfDevError> {
        let rule_spec = format!("{rule},tcp,127.0.0.1,{host_port},,{guest_port}");
        self.run(&["modifyvm", name, "--natpf1", &rule_spec]).await?;
        Ok(())
    }

    async fn get_host_forward_port(&self, name: &str, rule: &str) -> Result<u16, PcfDevError> {
        let info = self.vm_info(name).await?;
        find_forwarded_port(&info, rule).ok_or_else(|| PcfDevError::Driver {
            command: format!("showvminfo {name} --machinereadable"),
            message: format!("could not find forwarded port '{rule}'"),
        })
    }

    async fn set_cpus(&self, name: &str, cpus: u32) -> Result<(), PcfDevError> {
        self.run(&["modifyvm", name, "--cpus", &cpus.to_string()])
            .await?;
        Ok(())
    }

    async fn set_memory(&self, name: &str, memory_mb: u64) -> Result<(), PcfDevError> {
        self.run(&["modifyvm", name, "--memory", &memory_mb.to_string()])
            .await?;
        Ok(())
    }

    async fn get_memory(&self, name: &str) -> Result<u64, PcfDevError> {
        let info = self.vm_info(name).await?;
        info.get("memory")
            .and_then(|m| m.parse().ok())
            .ok_or_else(|| PcfDevError::Driver {
                command: format!("showvminfo {name} --machinereadable"),
                message: "no memory setting in output".into(),
            })
    }

    async fn use_dns_proxy(&self, name: &str) -> Result<(), PcfDevError> {
        self.run(&["modifyvm", name, "--natdnsproxy1", "on"]).await?;
        Ok(())
    }

    async fn get_vm_ip(&self, name: &str) -> Result<String, PcfDevError> {
        let info = self.vm_info(name).await?;
        let interface = info.get("hostonlyadapter2").ok_or_else(|| PcfDevError::Driver {
            command: format!("showvminfo {name} --machinereadable"),
            message: format!("there is no attached hostonlyif for {name}"),
        })?;
        let gateway = self
            .get_host_only_interfaces()
            .await?
            .into_iter()
            .find(|i| &i.name == interface)
            .map(|i| i.ip)
            .ok_or_else(|| PcfDevError::Driver {
                command: "list hostonlyifs".into(),
                message: format!("host-only interface {interface} not found"),
            })?;
        crate::address::ip_for_subnet(&gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM_INFO: &str = r#"name="pcfdev-v0.1.0"
memory=4096
cpus=2
VMState="running"
VMStateChangeTime="2016-05-23T15:32:36.000000000"
nic1="nat"
Forwarding(0)="ssh,tcp,127.0.0.1,50051,,22"
Forwarding(1)="http,tcp,127.0.0.1,8080,,80"
nic2="hostonly"
hostonlyadapter2="vboxnet1"
"#;

    #[test]
    fn machine_readable_strips_quotes() {
        let info = parse_machine_readable(VM_INFO);
        assert_eq!(info["name"], "pcfdev-v0.1.0");
        assert_eq!(info["memory"], "4096");
        assert_eq!(info["VMState"], "running");
        assert_eq!(info["hostonlyadapter2"], "vboxnet1");
    }

    #[test]
    fn forwarded_port_by_rule_name() {
        let info = parse_machine_readable(VM_INFO);
        assert_eq!(find_forwarded_port(&info, "ssh"), Some(50051));
        assert_eq!(find_forwarded_port(&info, "http"), Some(8080));
        assert_eq!(find_forwarded_port(&info, "https"), None);
    }

    #[test]
    fn vm_list_keeps_names_with_spaces() {
        let output = "\"pcfdev-v0.1.0\" {5b7e1f0a-1111-2222-3333-444455556666}\n\"my vm\" {0a0a0a0a-1111-2222-3333-444455556666}\n";
        assert_eq!(parse_vm_list(output), vec!["pcfdev-v0.1.0", "my vm"]);
    }

    #[test]
    fn disk_list_reads_locations() {
        let output = "UUID:           1234\nParent UUID:    base\nState:          created\nLocation:       /home/user/.pcfdev/vms/pcfdev-v0.1.0/pcfdev-v0.1.0-disk1.vmdk\nStorage format: VMDK\n\nUUID:           5678\nLocation:       /other/disk.vdi\n";
        assert_eq!(
            parse_disk_list(output),
            vec![
                PathBuf::from("/home/user/.pcfdev/vms/pcfdev-v0.1.0/pcfdev-v0.1.0-disk1.vmdk"),
                PathBuf::from("/other/disk.vdi"),
            ]
        );
    }

    #[test]
    fn host_only_interfaces_pair_name_and_ip() {
        let output = "Name:            vboxnet0\nGUID:            786f6276-656e-4074-8000-0a0027000000\nDHCP:            Disabled\nIPAddress:       192.168.11.1\nNetworkMask:     255.255.255.0\n\nName:            vboxnet1\nGUID:            786f6276-656e-4174-8000-0a0027000001\nIPAddress:       192.168.22.1\n";
        assert_eq!(
            parse_host_only_interfaces(output),
            vec![
                NetworkInterface::new("vboxnet0", "192.168.11.1"),
                NetworkInterface::new("vboxnet1", "192.168.22.1"),
            ]
        );
    }

    #[test]
    fn created_interface_name() {
        let output = "0%...10%...100%\nInterface 'vboxnet3' was successfully created\n";
        assert_eq!(parse_created_interface(output).as_deref(), Some("vboxnet3"));
        assert_eq!(parse_created_interface("garbage"), None);
    }

    #[tokio::test]
    async fn failing_binary_reports_command() {
        let driver = VBoxManage {
            binary: PathBuf::from("false"),
        };
        let err = driver.start_vm("some-vm").await.unwrap_err();
        assert!(
            err.to_string()
                .starts_with("failed to execute 'VBoxManage startvm some-vm --type headless'")
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_driver_error() {
        let driver = VBoxManage {
            binary: PathBuf::from("/nonexistent/VBoxManage"),
        };
        assert!(matches!(
            driver.vms().await,
            Err(PcfDevError::Driver { .. })
        ));
    }
}
