//! VM orchestration: the import and start sequences, and sweeps over every
//! VM this tool owns.

pub mod templates;

use std::path::{Path, PathBuf};

use facet::Facet;

use crate::address;
use crate::backend::Backend;
use crate::config::{Config, OWNED_PREFIX, VmConfig};
use crate::driver::Driver;
use crate::error::PcfDevError;
use crate::fs::HostFs;
use crate::network::HostNetwork;
use crate::paths;
use crate::shell::{GuestShell, LONG_TIMEOUT, SshAddress};
use templates::{NetworkProperties, ProxySettings};

/// Disk member picked out of an image archive.
pub const DISK_PATTERN: &str = "*.vmdk";

/// Name of the NAT rule forwarding a host port to the guest's sshd.
pub const SSH_RULE: &str = "ssh";

/// Network identity persisted next to the VM, readable without the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct VmRecord {
    pub ip: String,
    pub domain: String,
}

pub struct VBox<B: Backend> {
    pub config: Config,
    pub driver: B::Driver,
    pub shell: B::Shell,
    pub fs: B::Fs,
    pub network: B::Network,
}

impl<B: Backend> VBox<B> {
    pub fn new(
        config: Config,
        driver: B::Driver,
        shell: B::Shell,
        fs: B::Fs,
        network: B::Network,
    ) -> Self {
        Self {
            config,
            driver,
            shell,
            fs,
            network,
        }
    }

    // ── import ────────────────────────────────────────────

    /// Create and configure a VM from `vm.image_path`. Stops at the first
    /// failure; nothing already done is undone.
    pub async fn import_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        let name = vm.name.as_str();
        let vm_dir = &self.config.vm_dir;

        tracing::info!(name, image = %vm.image_path.display(), "creating VM");
        self.driver.create_vm(name, vm_dir).await?;

        let compressed = paths::compressed_disk_path(vm_dir, name);
        let disk = paths::disk_path(vm_dir, name);
        self.fs
            .extract(&vm.image_path, &compressed, DISK_PATTERN)
            .await?;
        self.driver.clone_disk(&compressed, &disk).await?;
        self.driver.delete_disk(&compressed).await?;
        self.driver.attach_disk(name, &disk).await?;
        tracing::info!(name, disk = %disk.display(), "disk attached");

        let vboxnets = self.driver.get_host_only_interfaces().await?;
        let host_interfaces = self.network.interfaces()?;
        let gateway =
            address::select_available_ip(&self.driver, &vboxnets, &host_interfaces).await?;
        let interface = match vboxnets.iter().find(|i| i.ip == gateway) {
            Some(existing) => {
                self.driver
                    .configure_host_only_interface(&existing.name, &gateway)
                    .await?;
                existing.name.clone()
            }
            None => self.driver.create_host_only_interface(&gateway).await?,
        };
        self.driver
            .attach_network_interface(&interface, name)
            .await?;

        let ip = address::ip_for_subnet(&gateway)?;
        let domain = address::domain_for_ip(&ip)?;
        tracing::info!(name, interface, ip, domain, "private network attached");
        self.write_vm_record(name, &VmRecord { ip, domain }).await?;

        self.driver.use_dns_proxy(name).await?;

        let ssh = self.shell.generate_address()?;
        self.driver.forward_port(name, SSH_RULE, ssh.port, 22).await?;

        self.driver.set_cpus(name, vm.cpus).await?;
        self.driver.set_memory(name, vm.memory_mb).await?;
        tracing::info!(name, cpus = vm.cpus, memory_mb = vm.memory_mb, "VM imported");
        Ok(())
    }

    // ── start ─────────────────────────────────────────────

    /// Boot the VM, push host-side configuration into the guest, and reboot
    /// so it takes effect.
    pub async fn start_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        let name = vm.name.as_str();
        tracing::info!(name, "starting VM");
        self.driver.start_vm(name).await?;

        self.insert_secure_keypair(vm).await?;
        self.configure_network(vm).await?;
        self.configure_environment(vm).await?;

        tracing::info!(name, "rebooting VM to apply guest configuration");
        self.driver.stop_vm(name).await?;
        self.driver.start_vm(name).await
    }

    async fn insert_secure_keypair(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        let key_path = &self.config.private_key_path;
        if self.fs.exists(key_path).await? {
            return Ok(());
        }

        let keypair = self.shell.generate_keypair()?;
        let insecure_key = self.fs.read(&self.config.insecure_private_key_path).await?;
        let public_key = String::from_utf8_lossy(&keypair.public_key);
        let command = format!(
            "echo -n \"{}\" > /home/{}/.ssh/authorized_keys",
            public_key.trim(),
            self.config.ssh_user
        );
        self.shell
            .run(
                &command,
                &guest_addresses(vm),
                &insecure_key,
                LONG_TIMEOUT,
            )
            .await?;

        self.fs.write(key_path, &keypair.private_key, false).await?;
        self.fs.chmod(key_path, 0o600).await?;
        tracing::info!(path = %key_path.display(), "installed guest SSH key");
        Ok(())
    }

    async fn configure_network(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        let key = self.fs.read(&self.config.private_key_path).await?;
        let interfaces = templates::render_interfaces(&NetworkProperties { ip: &vm.ip });
        self.shell
            .run(
                &format!("echo -e '{interfaces}' | sudo tee /etc/network/interfaces"),
                &guest_addresses(vm),
                &key,
                LONG_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn configure_environment(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        let settings = ProxySettings::for_guest(&self.config, vm)?;
        let key = self.fs.read(&self.config.private_key_path).await?;
        let environment = templates::render_environment(&settings);
        self.shell
            .run(
                &format!("echo -e '{environment}' | sudo tee /etc/environment"),
                &guest_addresses(vm),
                &key,
                LONG_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    /// Key for talking to a configured guest: the generated key once it
    /// exists, the insecure bootstrap key before that.
    pub async fn guest_key(&self) -> Result<Vec<u8>, PcfDevError> {
        if self.fs.exists(&self.config.private_key_path).await? {
            self.fs.read(&self.config.private_key_path).await
        } else {
            self.fs.read(&self.config.insecure_private_key_path).await
        }
    }

    // ── power ─────────────────────────────────────────────

    pub async fn stop_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        self.driver.stop_vm(&vm.name).await
    }

    pub async fn suspend_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        self.driver.suspend_vm(&vm.name).await
    }

    pub async fn resume_paused_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        self.driver.resume_vm(&vm.name).await
    }

    pub async fn resume_saved_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        self.driver.start_vm(&vm.name).await
    }

    /// Unregister the VM and drop its host directory and guest key.
    pub async fn destroy_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        self.driver.destroy_vm(&vm.name).await?;
        self.remove_vm_dir(&vm.name).await?;
        self.remove_private_key().await
    }

    pub async fn power_off_and_destroy_vm(&self, vm: &VmConfig) -> Result<(), PcfDevError> {
        self.driver.power_off_vm(&vm.name).await?;
        self.destroy_vm(vm).await
    }

    pub async fn remove_vm_dir(&self, name: &str) -> Result<(), PcfDevError> {
        self.fs
            .remove(&paths::vm_work_dir(&self.config.vm_dir, name))
            .await
    }

    /// The generated key is only trusted by the VM it was installed in.
    async fn remove_private_key(&self) -> Result<(), PcfDevError> {
        self.fs.remove(&self.config.private_key_path).await
    }

    // ── records ───────────────────────────────────────────

    fn record_path(&self, name: &str) -> PathBuf {
        paths::vm_record_path(&self.config.vm_dir, name)
    }

    async fn write_vm_record(&self, name: &str, record: &VmRecord) -> Result<(), PcfDevError> {
        let json = facet_json::to_string(record).map_err(|e| PcfDevError::Json {
            what: "VM record".into(),
            message: e.to_string(),
        })?;
        self.fs
            .write(&self.record_path(name), json.as_bytes(), false)
            .await
    }

    /// The persisted record, or `None` if the VM never got that far.
    pub async fn read_vm_record(&self, name: &str) -> Result<Option<VmRecord>, PcfDevError> {
        let path = self.record_path(name);
        if !self.fs.exists(&path).await? {
            return Ok(None);
        }
        let bytes = self.fs.read(&path).await?;
        let text = String::from_utf8_lossy(&bytes);
        facet_json::from_str::<VmRecord>(&text)
            .map(Some)
            .map_err(|e| PcfDevError::Json {
                what: path.display().to_string(),
                message: e.to_string(),
            })
    }

    // ── owned VMs ─────────────────────────────────────────

    /// The single owned VM, if any.
    pub async fn get_vm_name(&self) -> Result<Option<String>, PcfDevError> {
        let mut owned = self
            .driver
            .vms()
            .await?
            .into_iter()
            .filter(|vm| vm.starts_with(OWNED_PREFIX));
        match (owned.next(), owned.next()) {
            (None, _) => Ok(None),
            (Some(name), None) => Ok(Some(name)),
            (Some(_), Some(_)) => Err(PcfDevError::MultipleVms),
        }
    }

    /// True when an owned VM other than `name` is registered.
    pub async fn conflicting_vm_present(&self, name: &str) -> Result<bool, PcfDevError> {
        Ok(self
            .driver
            .vms()
            .await?
            .iter()
            .any(|vm| vm.starts_with(OWNED_PREFIX) && vm != name))
    }

    /// Best-effort removal of every owned VM and disk; fails only if some survive.
    pub async fn destroy_pcfdev_vms(&self) -> Result<(), PcfDevError> {
        for vm in self.owned_vms().await? {
            if let Err(e) = self.driver.power_off_vm(&vm).await {
                tracing::warn!(vm, "power off during sweep failed: {e}");
            }
            if let Err(e) = self.driver.destroy_vm(&vm).await {
                tracing::warn!(vm, "destroy during sweep failed: {e}");
            }
        }
        if !self.owned_vms().await?.is_empty() {
            return Err(PcfDevError::DestroyIncomplete { what: "vms" });
        }
        self.remove_private_key().await?;

        for disk in self.owned_disks().await? {
            if let Err(e) = self.driver.delete_disk(&disk).await {
                tracing::warn!(disk = %disk.display(), "disk delete during sweep failed: {e}");
            }
        }
        if !self.owned_disks().await?.is_empty() {
            return Err(PcfDevError::DestroyIncomplete { what: "disks" });
        }

        tracing::info!("removed all PCF Dev VMs and disks");
        Ok(())
    }

    async fn owned_vms(&self) -> Result<Vec<String>, PcfDevError> {
        Ok(self
            .driver
            .vms()
            .await?
            .into_iter()
            .filter(|vm| vm.starts_with(OWNED_PREFIX))
            .collect())
    }

    async fn owned_disks(&self) -> Result<Vec<PathBuf>, PcfDevError> {
        Ok(self
            .driver
            .disks()
            .await?
            .into_iter()
            .filter(|disk| is_owned_disk(disk))
            .collect())
    }
}

/// Both the NAT forward and the private address; whichever answers first.
pub fn guest_addresses(vm: &VmConfig) -> [SshAddress; 2] {
    [SshAddress::loopback(vm.ssh_port), SshAddress::new(&vm.ip, 22)]
}

fn is_owned_disk(disk: &Path) -> bool {
    disk.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.starts_with(OWNED_PREFIX))
}
