pub mod vboxmanage;

use crate::config::Config;
use crate::driver::Driver;
use crate::fs::{HostFs, LocalFs};
use crate::network::{HostNetwork, SystemNetwork};
use crate::shell::GuestShell;
use crate::shell::ssh::SshClient;
use crate::vbox::VBox;

/// The set of collaborators the orchestrator and lifecycle states run against.
pub trait Backend {
    type Driver: Driver;
    type Shell: GuestShell;
    type Fs: HostFs;
    type Network: HostNetwork;
}

/// VirtualBox via `VBoxManage`, SSH via russh, the local filesystem and host interfaces.
pub struct VirtualBox;

impl Backend for VirtualBox {
    type Driver = vboxmanage::VBoxManage;
    type Shell = SshClient;
    type Fs = LocalFs;
    type Network = SystemNetwork;
}

pub fn create_backend(config: Config) -> VBox<VirtualBox> {
    let shell = SshClient::new(config.ssh_user.clone());
    VBox::new(
        config,
        vboxmanage::VBoxManage::new(),
        shell,
        LocalFs,
        SystemNetwork,
    )
}
