//! In-memory collaborators for unit tests. Every call is appended to a shared
//! journal so tests can assert ordering across driver, shell and filesystem.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::address;
use crate::backend::Backend;
use crate::config::Config;
use crate::driver::{Driver, HypervisorState};
use crate::error::PcfDevError;
use crate::fs::HostFs;
use crate::network::{HostNetwork, NetworkInterface};
use crate::shell::{CommandOutput, GuestShell, Keypair, SshAddress};
use crate::vbox::VBox;

pub const HOME: &str = "/pcfdev";

#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: String) {
        self.0.borrow_mut().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.borrow().iter().any(|e| e == entry)
    }

    pub fn any_starting_with(&self, prefix: &str) -> bool {
        self.0.borrow().iter().any(|e| e.starts_with(prefix))
    }
}

// ── driver ────────────────────────────────────────────────

#[derive(Default)]
struct Machine {
    state: Option<HypervisorState>,
    ip: Option<String>,
    memory_mb: Option<u64>,
    ssh_port: Option<u16>,
    interface: Option<String>,
}

/// A small hypervisor model: VMs, disks, host-only interfaces.
pub struct FakeDriver {
    journal: Journal,
    vms: RefCell<Vec<String>>,
    machines: RefCell<HashMap<String, Machine>>,
    disks: RefCell<Vec<PathBuf>>,
    host_only: RefCell<Vec<NetworkInterface>>,
    in_use: RefCell<HashSet<String>>,
    failing: RefCell<HashSet<String>>,
}

impl FakeDriver {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            vms: RefCell::default(),
            machines: RefCell::default(),
            disks: RefCell::default(),
            host_only: RefCell::default(),
            in_use: RefCell::default(),
            failing: RefCell::default(),
        }
    }

    /// Register a fully imported VM on `192.168.11.11`, forwarded from port 5555.
    pub fn register(&self, name: &str, state: HypervisorState) {
        self.vms.borrow_mut().push(name.to_string());
        self.machines.borrow_mut().insert(
            name.to_string(),
            Machine {
                state: Some(state),
                ip: Some("192.168.11.11".into()),
                memory_mb: Some(4096),
                ssh_port: Some(5555),
                interface: None,
            },
        );
    }

    pub fn set_ip(&self, name: &str, ip: Option<&str>) {
        if let Some(m) = self.machines.borrow_mut().get_mut(name) {
            m.ip = ip.map(str::to_string);
        }
    }

    pub fn set_ssh_port(&self, name: &str, port: Option<u16>) {
        if let Some(m) = self.machines.borrow_mut().get_mut(name) {
            m.ssh_port = port;
        }
    }

    pub fn set_memory_lookup(&self, name: &str, memory_mb: Option<u64>) {
        if let Some(m) = self.machines.borrow_mut().get_mut(name) {
            m.memory_mb = memory_mb;
        }
    }

    pub fn set_vms(&self, vms: &[&str]) {
        *self.vms.borrow_mut() = vms.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_disks(&self, disks: &[&str]) {
        *self.disks.borrow_mut() = disks.iter().map(PathBuf::from).collect();
    }

    pub fn host_only_interfaces(&self, interfaces: Vec<NetworkInterface>) {
        *self.host_only.borrow_mut() = interfaces;
    }

    pub fn interfaces_in_use(&self, names: &[&str]) {
        *self.in_use.borrow_mut() = names.iter().map(|s| s.to_string()).collect();
    }

    /// Make every call of `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.failing.borrow_mut().insert(op.to_string());
    }

    pub fn state_of(&self, name: &str) -> Option<HypervisorState> {
        self.machines.borrow().get(name).and_then(|m| m.state.clone())
    }

    fn call(&self, op: &str, args: String) -> Result<(), PcfDevError> {
        let entry = if args.is_empty() {
            format!("driver {op}")
        } else {
            format!("driver {op} {args}")
        };
        self.journal.record(entry);
        if self.failing.borrow().contains(op) {
            return Err(PcfDevError::Driver {
                command: format!("{op} {args}"),
                message: "some-error".into(),
            });
        }
        Ok(())
    }

    fn set_state(&self, name: &str, state: HypervisorState) {
        self.machines
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .state = Some(state);
    }

    fn lookup<T>(
        &self,
        name: &str,
        what: &str,
        f: impl FnOnce(&Machine) -> Option<T>,
    ) -> Result<T, PcfDevError> {
        self.machines
            .borrow()
            .get(name)
            .and_then(f)
            .ok_or_else(|| PcfDevError::Driver {
                command: format!("showvminfo {name}"),
                message: format!("no {what}"),
            })
    }
}

impl Driver for FakeDriver {
    async fn create_vm(&self, name: &str, base_dir: &Path) -> Result<(), PcfDevError> {
        self.call("create_vm", format!("{name} {}", base_dir.display()))?;
        self.vms.borrow_mut().push(name.to_string());
        self.set_state(name, HypervisorState::Stopped);
        Ok(())
    }

    async fn start_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("start_vm", name.into())?;
        self.set_state(name, HypervisorState::Running);
        Ok(())
    }

    async fn stop_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("stop_vm", name.into())?;
        self.set_state(name, HypervisorState::Stopped);
        Ok(())
    }

    async fn power_off_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("power_off_vm", name.into())?;
        self.set_state(name, HypervisorState::Stopped);
        Ok(())
    }

    async fn suspend_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("suspend_vm", name.into())?;
        self.set_state(name, HypervisorState::Saved);
        Ok(())
    }

    async fn resume_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("resume_vm", name.into())?;
        self.set_state(name, HypervisorState::Running);
        Ok(())
    }

    async fn destroy_vm(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("destroy_vm", name.into())?;
        self.vms.borrow_mut().retain(|vm| vm != name);
        self.machines.borrow_mut().remove(name);
        Ok(())
    }

    async fn vm_exists(&self, name: &str) -> Result<bool, PcfDevError> {
        self.call("vm_exists", name.into())?;
        Ok(self.vms.borrow().iter().any(|vm| vm == name))
    }

    async fn vm_state(&self, name: &str) -> Result<HypervisorState, PcfDevError> {
        self.call("vm_state", name.into())?;
        self.lookup(name, "state", |m| m.state.clone())
    }

    async fn vms(&self) -> Result<Vec<String>, PcfDevError> {
        self.call("vms", String::new())?;
        Ok(self.vms.borrow().clone())
    }

    async fn disks(&self) -> Result<Vec<PathBuf>, PcfDevError> {
        self.call("disks", String::new())?;
        Ok(self.disks.borrow().clone())
    }

    async fn attach_disk(&self, name: &str, disk: &Path) -> Result<(), PcfDevError> {
        self.call("attach_disk", format!("{name} {}", disk.display()))
    }

    async fn clone_disk(&self, src: &Path, dest: &Path) -> Result<(), PcfDevError> {
        self.call("clone_disk", format!("{} {}", src.display(), dest.display()))?;
        self.disks.borrow_mut().push(dest.to_path_buf());
        Ok(())
    }

    async fn delete_disk(&self, disk: &Path) -> Result<(), PcfDevError> {
        self.call("delete_disk", disk.display().to_string())?;
        self.disks.borrow_mut().retain(|d| d != disk);
        Ok(())
    }

    async fn create_host_only_interface(&self, ip: &str) -> Result<String, PcfDevError> {
        self.call("create_host_only_interface", ip.into())?;
        self.host_only
            .borrow_mut()
            .push(NetworkInterface::new("vboxnet-new", ip));
        Ok("vboxnet-new".into())
    }

    async fn configure_host_only_interface(
        &self,
        interface: &str,
        ip: &str,
    ) -> Result<(), PcfDevError> {
        self.call("configure_host_only_interface", format!("{interface} {ip}"))
    }

    async fn attach_network_interface(
        &self,
        interface: &str,
        name: &str,
    ) -> Result<(), PcfDevError> {
        self.call("attach_network_interface", format!("{interface} {name}"))?;
        self.machines
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .interface = Some(interface.to_string());
        Ok(())
    }

    async fn get_host_only_interfaces(&self) -> Result<Vec<NetworkInterface>, PcfDevError> {
        self.call("get_host_only_interfaces", String::new())?;
        Ok(self.host_only.borrow().clone())
    }

    async fn is_interface_in_use(&self, interface: &str) -> Result<bool, PcfDevError> {
        self.call("is_interface_in_use", interface.into())?;
        Ok(self.in_use.borrow().contains(interface))
    }

    async fn forward_port(
        &self,
        name: &str,
        rule: &str,
        host_port: u16,
        guest_port: u16,
    ) -> Result<(), PcfDevError> {
        self.call("forward_port", format!("{name} {rule} {host_port} {guest_port}"))?;
        self.machines
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .ssh_port = Some(host_port);
        Ok(())
    }

    async fn get_host_forward_port(&self, name: &str, rule: &str) -> Result<u16, PcfDevError> {
        self.call("get_host_forward_port", format!("{name} {rule}"))?;
        self.lookup(name, "forwarded port", |m| m.ssh_port)
    }

    async fn set_cpus(&self, name: &str, cpus: u32) -> Result<(), PcfDevError> {
        self.call("set_cpus", format!("{name} {cpus}"))
    }

    async fn set_memory(&self, name: &str, memory_mb: u64) -> Result<(), PcfDevError> {
        self.call("set_memory", format!("{name} {memory_mb}"))?;
        self.machines
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .memory_mb = Some(memory_mb);
        Ok(())
    }

    async fn get_memory(&self, name: &str) -> Result<u64, PcfDevError> {
        self.call("get_memory", name.into())?;
        self.lookup(name, "memory", |m| m.memory_mb)
    }

    async fn use_dns_proxy(&self, name: &str) -> Result<(), PcfDevError> {
        self.call("use_dns_proxy", name.into())
    }

    async fn get_vm_ip(&self, name: &str) -> Result<String, PcfDevError> {
        self.call("get_vm_ip", name.into())?;
        let host_only = self.host_only.borrow().clone();
        self.lookup(name, "ip", |m| {
            m.ip.clone().or_else(|| {
                let interface = m.interface.as_ref()?;
                let gateway = host_only.iter().find(|i| &i.name == interface)?;
                address::ip_for_subnet(&gateway.ip).ok()
            })
        })
    }
}

// ── guest shell ───────────────────────────────────────────

pub struct FakeShell {
    journal: Journal,
    responses: RefCell<Vec<(String, String)>>,
    failing: RefCell<Vec<String>>,
}

impl FakeShell {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            responses: RefCell::default(),
            failing: RefCell::default(),
        }
    }

    /// Commands containing `fragment` print `stdout`.
    pub fn respond(&self, fragment: &str, stdout: &str) {
        self.responses
            .borrow_mut()
            .push((fragment.to_string(), stdout.to_string()));
    }

    /// Commands containing `fragment` exit non-zero.
    pub fn fail_on(&self, fragment: &str) {
        self.failing.borrow_mut().push(fragment.to_string());
    }
}

impl GuestShell for FakeShell {
    async fn run(
        &self,
        command: &str,
        addresses: &[SshAddress],
        private_key: &[u8],
        _timeout: Duration,
    ) -> Result<CommandOutput, PcfDevError> {
        let addresses: Vec<String> = addresses.iter().map(ToString::to_string).collect();
        self.journal.record(format!(
            "shell run [{}] key={} {command}",
            addresses.join(", "),
            String::from_utf8_lossy(private_key)
        ));

        if self.failing.borrow().iter().any(|f| command.contains(f.as_str())) {
            return Err(PcfDevError::Ssh {
                message: "some-ssh-error".into(),
                exit_status: Some(1),
            });
        }
        let stdout = self
            .responses
            .borrow()
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }

    fn generate_keypair(&self) -> Result<Keypair, PcfDevError> {
        self.journal.record("shell generate_keypair".into());
        Ok(Keypair {
            private_key: b"some-private-key".to_vec(),
            public_key: b"some-public-key".to_vec(),
        })
    }

    fn generate_address(&self) -> Result<SshAddress, PcfDevError> {
        self.journal.record("shell generate_address".into());
        Ok(SshAddress::loopback(5555))
    }
}

// ── filesystem ────────────────────────────────────────────

pub struct FakeFs {
    journal: Journal,
    files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: RefCell<HashSet<PathBuf>>,
    modes: RefCell<HashMap<PathBuf, u32>>,
}

impl FakeFs {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            files: RefCell::default(),
            dirs: RefCell::default(),
            modes: RefCell::default(),
        }
    }

    pub fn put(&self, path: &str, contents: &[u8]) {
        self.files
            .borrow_mut()
            .insert(PathBuf::from(path), contents.to_vec());
    }

    pub fn mkdir(&self, path: &str) {
        self.dirs.borrow_mut().insert(PathBuf::from(path));
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(Path::new(path)).cloned()
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.modes.borrow().get(Path::new(path)).copied()
    }

    fn present(&self, path: &Path) -> bool {
        self.files.borrow().keys().any(|f| f.starts_with(path))
            || self.dirs.borrow().iter().any(|d| d.starts_with(path))
    }
}

impl HostFs for FakeFs {
    async fn exists(&self, path: &Path) -> Result<bool, PcfDevError> {
        self.journal.record(format!("fs exists {}", path.display()));
        Ok(self.present(path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, PcfDevError> {
        self.journal.record(format!("fs read {}", path.display()));
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| PcfDevError::Io {
                context: format!("reading {}", path.display()),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }

    async fn write(&self, path: &Path, contents: &[u8], append: bool) -> Result<(), PcfDevError> {
        self.journal.record(format!("fs write {}", path.display()));
        let mut files = self.files.borrow_mut();
        let file = files.entry(path.to_path_buf()).or_default();
        if !append {
            file.clear();
        }
        file.extend_from_slice(contents);
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<(), PcfDevError> {
        self.journal.record(format!("fs remove {}", path.display()));
        self.files.borrow_mut().retain(|f, _| !f.starts_with(path));
        self.dirs.borrow_mut().retain(|d| !d.starts_with(path));
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<(), PcfDevError> {
        self.journal
            .record(format!("fs chmod {} {mode:o}", path.display()));
        self.modes.borrow_mut().insert(path.to_path_buf(), mode);
        Ok(())
    }

    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        pattern: &str,
    ) -> Result<(), PcfDevError> {
        self.journal.record(format!(
            "fs extract {} {} {pattern}",
            archive.display(),
            dest.display()
        ));
        self.files
            .borrow_mut()
            .insert(dest.to_path_buf(), b"compressed-disk".to_vec());
        Ok(())
    }
}

// ── host network ──────────────────────────────────────────

#[derive(Default)]
pub struct FakeNetwork {
    interfaces: RefCell<Vec<NetworkInterface>>,
}

impl FakeNetwork {
    pub fn set(&self, interfaces: Vec<NetworkInterface>) {
        *self.interfaces.borrow_mut() = interfaces;
    }
}

impl HostNetwork for FakeNetwork {
    fn interfaces(&self) -> Result<Vec<NetworkInterface>, PcfDevError> {
        Ok(self.interfaces.borrow().clone())
    }
}

// ── wiring ────────────────────────────────────────────────

pub struct FakeBackend;

impl Backend for FakeBackend {
    type Driver = FakeDriver;
    type Shell = FakeShell;
    type Fs = FakeFs;
    type Network = FakeNetwork;
}

/// Orchestrator over fakes, rooted at `/pcfdev`, sharing one journal.
pub fn fake_vbox() -> VBox<FakeBackend> {
    let journal = Journal::default();
    VBox::new(
        Config::for_home(Path::new(HOME)),
        FakeDriver::new(journal.clone()),
        FakeShell::new(journal.clone()),
        FakeFs::new(journal),
        FakeNetwork::default(),
    )
}

impl VBox<FakeBackend> {
    pub fn journal(&self) -> &Journal {
        &self.driver.journal
    }
}
