use std::time::Duration;

use super::{Invalid, NotCreated, Running, Stopped, Suspended, Unprovisioned, Vm};
use crate::address;
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::driver::{Driver, HypervisorState};
use crate::error::PcfDevError;
use crate::fs::HostFs;
use crate::paths;
use crate::shell::GuestShell;
use crate::vbox::{SSH_RULE, VBox, guest_addresses};

/// Prints `ok` once every service in the guest is up.
pub const HEALTH_CHECK: &str = "sudo /var/pcfdev/health-check";

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Classifies the VM of a given name into its lifecycle variant.
pub struct Builder<'a, B: Backend> {
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> Builder<'a, B> {
    pub fn new(vbox: &'a VBox<B>) -> Self {
        Self { vbox }
    }

    pub async fn vm(&self, name: &str) -> Result<Vm<'a, B>, PcfDevError> {
        let vbox = self.vbox;

        if !vbox.driver.vm_exists(name).await? {
            let dir = paths::vm_work_dir(&vbox.config.vm_dir, name);
            if vbox.fs.exists(&dir).await? {
                return Ok(invalid(
                    name,
                    format!("{} exists but no VM is registered", dir.display()),
                    vbox,
                ));
            }
            return Ok(Vm::NotCreated(NotCreated::new(name, vbox)));
        }

        let (ip, domain) = match self.network_identity(name).await {
            Ok(found) => found,
            Err(reason) => return Ok(invalid(name, reason, vbox)),
        };
        let memory_mb = vbox.driver.get_memory(name).await?;
        let ssh_port = match self.ssh_port(name, &ip).await {
            Ok(port) => port,
            Err(reason) => return Ok(invalid(name, reason, vbox)),
        };
        let vm = VmConfig {
            name: name.to_string(),
            ip,
            domain,
            ssh_port,
            memory_mb,
            ..Default::default()
        };

        let state = vbox.driver.vm_state(name).await?;
        tracing::debug!(name, ?state, ip = %vm.ip, "classifying VM");
        match state {
            HypervisorState::Running => {
                if self.healthy(&vm).await {
                    Ok(Vm::Running(Running::new(vm, vbox)))
                } else {
                    Ok(Vm::Unprovisioned(Unprovisioned::new(vm, vbox)))
                }
            }
            HypervisorState::Stopped | HypervisorState::Aborted => {
                Ok(Vm::Stopped(Stopped::new(vm, vbox)))
            }
            HypervisorState::Saved => Ok(Vm::Suspended(Suspended::new(vm, false, vbox))),
            HypervisorState::Paused => Ok(Vm::Suspended(Suspended::new(vm, true, vbox))),
            HypervisorState::Other(state) => Err(PcfDevError::UnknownState { state }),
        }
    }

    /// Resolve IP and domain. `Err` names the lookup that failed.
    async fn network_identity(&self, name: &str) -> Result<(String, String), String> {
        let ip = self
            .vbox
            .driver
            .get_vm_ip(name)
            .await
            .map_err(|e| format!("could not determine VM ip: {e}"))?;
        let domain = address::domain_for_ip(&ip).map_err(|e| e.to_string())?;
        Ok((ip, domain))
    }

    /// Check the persisted record against `ip` and find the forwarded SSH port.
    async fn ssh_port(&self, name: &str, ip: &str) -> Result<u16, String> {
        let vbox = self.vbox;
        match vbox.read_vm_record(name).await {
            Ok(Some(record)) if record.ip != ip => {
                return Err(format!(
                    "recorded ip {} does not match hypervisor ip {ip}",
                    record.ip
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(format!("could not read VM record: {e}")),
        }

        vbox.driver
            .get_host_forward_port(name, SSH_RULE)
            .await
            .map_err(|e| format!("could not determine forwarded ssh port: {e}"))
    }

    async fn healthy(&self, vm: &VmConfig) -> bool {
        let vbox = self.vbox;
        let key = match vbox.guest_key().await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(name = %vm.name, "no key for health check: {e}");
                return false;
            }
        };
        match vbox
            .shell
            .output(HEALTH_CHECK, &guest_addresses(vm), &key, HEALTH_CHECK_TIMEOUT)
            .await
        {
            Ok(out) => out.trim() == "ok",
            Err(e) => {
                tracing::debug!(name = %vm.name, "health check failed: {e}");
                false
            }
        }
    }
}

fn invalid<'a, B: Backend>(name: &str, reason: String, vbox: &'a VBox<B>) -> Vm<'a, B> {
    Vm::Invalid(Invalid::new(name, reason, vbox))
}
