//! Hypervisor driver interface consumed by the orchestrator and the builder.

use std::path::{Path, PathBuf};

use crate::error::PcfDevError;
use crate::network::NetworkInterface;

/// Power state as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HypervisorState {
    Running,
    Stopped,
    Aborted,
    Saved,
    Paused,
    Other(String),
}

impl HypervisorState {
    /// Parse a VirtualBox `VMState` value.
    pub fn parse(state: &str) -> Self {
        match state {
            "running" => HypervisorState::Running,
            "poweroff" => HypervisorState::Stopped,
            "aborted" => HypervisorState::Aborted,
            "saved" => HypervisorState::Saved,
            "paused" => HypervisorState::Paused,
            other => HypervisorState::Other(other.to_string()),
        }
    }
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Driver {
    async fn create_vm(&self, name: &str, base_dir: &Path) -> Result<(), PcfDevError>;
    async fn start_vm(&self, name: &str) -> Result<(), PcfDevError>;
    /// Graceful shutdown; returns once the VM reports powered off.
    async fn stop_vm(&self, name: &str) -> Result<(), PcfDevError>;
    async fn power_off_vm(&self, name: &str) -> Result<(), PcfDevError>;
    async fn suspend_vm(&self, name: &str) -> Result<(), PcfDevError>;
    /// Resume a paused VM. A saved VM is resumed with `start_vm`.
    async fn resume_vm(&self, name: &str) -> Result<(), PcfDevError>;
    async fn destroy_vm(&self, name: &str) -> Result<(), PcfDevError>;

    async fn vm_exists(&self, name: &str) -> Result<bool, PcfDevError>;
    async fn vm_state(&self, name: &str) -> Result<HypervisorState, PcfDevError>;
    async fn vms(&self) -> Result<Vec<String>, PcfDevError>;
    async fn disks(&self) -> Result<Vec<PathBuf>, PcfDevError>;

    async fn attach_disk(&self, name: &str, disk: &Path) -> Result<(), PcfDevError>;
    async fn clone_disk(&self, src: &Path, dest: &Path) -> Result<(), PcfDevError>;
    async fn delete_disk(&self, disk: &Path) -> Result<(), PcfDevError>;

    /// Create a host-only interface carrying `ip`; returns its name.
    async fn create_host_only_interface(&self, ip: &str) -> Result<String, PcfDevError>;
    async fn configure_host_only_interface(&self, interface: &str, ip: &str)
    -> Result<(), PcfDevError>;
    async fn attach_network_interface(&self, interface: &str, name: &str)
    -> Result<(), PcfDevError>;
    async fn get_host_only_interfaces(&self) -> Result<Vec<NetworkInterface>, PcfDevError>;
    async fn is_interface_in_use(&self, interface: &str) -> Result<bool, PcfDevError>;

    async fn forward_port(
        &self,
        name: &str,
        rule: &str,
        host_port: u16,
        guest_port: u16,
    ) -> Result<(), PcfDevError>;
    async fn get_host_forward_port(&self, name: &str, rule: &str) -> Result<u16, PcfDevError>;

    async fn set_cpus(&self, name: &str, cpus: u32) -> Result<(), PcfDevError>;
    async fn set_memory(&self, name: &str, memory_mb: u64) -> Result<(), PcfDevError>;
    async fn get_memory(&self, name: &str) -> Result<u64, PcfDevError>;
    async fn use_dns_proxy(&self, name: &str) -> Result<(), PcfDevError>;
    async fn get_vm_ip(&self, name: &str) -> Result<String, PcfDevError>;
}
