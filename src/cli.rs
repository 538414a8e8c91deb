use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::backend::Backend;
use crate::config::CUSTOM_VM_NAME;
use crate::error::PcfDevError;
use crate::vbox::VBox;
use crate::vm::{Builder, Lifecycle, StartOpts, Vm};

#[derive(Parser, Debug)]
#[command(name = "pcfdev", version, about = "Run PCF Dev in a local VirtualBox VM")]
pub struct Cli {
    /// Path to config file (defaults to $PCFDEV_HOME/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Import the VM if needed, boot it and provision PCF Dev
    Start {
        /// Memory to allocate in MB
        #[arg(short, long)]
        memory: Option<u64>,

        /// Number of CPU cores
        #[arg(short = 'c', long)]
        cpus: Option<u32>,

        /// Custom OVA image to import
        #[arg(short = 'o', long)]
        image: Option<PathBuf>,

        /// Comma-separated services to start (default: all)
        #[arg(short, long)]
        services: Option<String>,

        /// Comma-separated insecure docker registries
        #[arg(short, long, value_delimiter = ',')]
        registries: Vec<String>,

        /// Boot without running the provisioner
        #[arg(long)]
        no_provision: bool,
    },

    /// Shut the VM down
    Stop,

    /// Save the VM state to disk
    Suspend,

    /// Resume a suspended VM
    Resume,

    /// Show the VM status
    Status,

    /// Remove the VM and its disks
    Destroy,

    /// Rerun the provisioner with the options of the last start
    Provision,
}

impl Command {
    /// Spinner label for commands that talk to the hypervisor for a while.
    pub fn progress_label(&self) -> Option<&'static str> {
        match self {
            Command::Start { .. } => Some("Starting PCF Dev"),
            Command::Stop => Some("Stopping PCF Dev"),
            Command::Suspend => Some("Suspending PCF Dev"),
            Command::Resume => Some("Resuming PCF Dev"),
            Command::Destroy => Some("Destroying PCF Dev"),
            Command::Provision => Some("Provisioning PCF Dev"),
            Command::Status => None,
        }
    }

    fn start_opts(&self) -> StartOpts {
        match self {
            Command::Start {
                memory,
                cpus,
                image,
                services,
                registries,
                no_provision,
            } => StartOpts {
                memory_mb: *memory,
                cpus: *cpus,
                image_path: image.clone(),
                services: services.clone(),
                registries: registries
                    .iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect(),
                no_provision: *no_provision,
            },
            _ => StartOpts::default(),
        }
    }
}

/// Run one command against the VM and return what to print.
pub async fn dispatch<B: Backend>(
    vbox: &VBox<B>,
    command: &Command,
) -> Result<String, PcfDevError> {
    tracing::debug!(?command, "dispatching");
    let outcome = match command {
        Command::Destroy => return destroy(vbox).await,
        Command::Status => return Ok(target(vbox, false).await?.status()),
        Command::Start { .. } => {
            let opts = command.start_opts();
            let vm = target(vbox, opts.image_path.is_some()).await?;
            vm.verify_start_opts(&opts).await?;
            vm.start(&opts).await?
        }
        Command::Stop => target(vbox, false).await?.stop().await?,
        Command::Suspend => target(vbox, false).await?.suspend().await?,
        Command::Resume => target(vbox, false).await?.resume().await?,
        Command::Provision => target(vbox, false).await?.provision().await?,
    };
    Ok(outcome.to_string())
}

async fn target<B: Backend>(
    vbox: &VBox<B>,
    custom_image: bool,
) -> Result<Vm<'_, B>, PcfDevError> {
    let name = resolve_vm_name(vbox, custom_image).await?;
    tracing::debug!(name, "resolved VM");
    Builder::new(vbox).vm(&name).await
}

/// The VM this version manages: the registered one if it is ours, else the
/// name a fresh import would use. Any other owned VM is from an old version.
async fn resolve_vm_name<B: Backend>(
    vbox: &VBox<B>,
    custom_image: bool,
) -> Result<String, PcfDevError> {
    let default = &vbox.config.default_vm_name;
    match vbox.get_vm_name().await? {
        Some(name) if &name == default || name == CUSTOM_VM_NAME => Ok(name),
        Some(name) => {
            tracing::debug!(name, "registered VM belongs to another version");
            Err(PcfDevError::OldVm)
        }
        None if custom_image => Ok(CUSTOM_VM_NAME.to_string()),
        None => Ok(default.clone()),
    }
}

/// Destroy whatever owned VM is registered, or sweep when there is not
/// exactly one.
async fn destroy<B: Backend>(vbox: &VBox<B>) -> Result<String, PcfDevError> {
    let name = match vbox.get_vm_name().await {
        Ok(Some(name)) => name,
        Ok(None) => {
            vbox.destroy_pcfdev_vms()
                .await
                .map_err(|e| PcfDevError::operation("destroy", e))?;
            return Ok("PCF Dev VM has not been created".into());
        }
        Err(PcfDevError::MultipleVms) => {
            tracing::info!("multiple owned VMs registered, sweeping");
            vbox.destroy_pcfdev_vms()
                .await
                .map_err(|e| PcfDevError::operation("destroy", e))?;
            return Ok("PCF Dev VMs have been destroyed".into());
        }
        Err(e) => return Err(e),
    };

    let vm = Builder::new(vbox).vm(&name).await?;
    if let Vm::NotCreated(_) = vm {
        return Ok("PCF Dev VM has not been created".into());
    }
    Ok(vm.destroy().await?.to_string())
}
