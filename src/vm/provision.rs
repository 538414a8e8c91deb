use facet::Facet;

use super::StartOpts;
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::error::PcfDevError;
use crate::shell::{GuestShell, LONG_TIMEOUT, SHORT_TIMEOUT, shell_escape};
use crate::vbox::{VBox, guest_addresses};

/// Where the guest keeps the options of its last provisioning run.
pub const OPTIONS_PATH: &str = "/var/pcfdev/provision-options.json";

const PROVISIONER: &str = "/var/pcfdev/run";

/// Arguments to the in-guest provisioner, persisted so `provision` can rerun it.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ProvisionOptions {
    pub domain: String,
    pub ip: String,
    pub services: String,
    #[facet(default)]
    pub registries: Vec<String>,
}

impl ProvisionOptions {
    pub fn new(vm: &VmConfig, opts: &StartOpts) -> Self {
        Self {
            domain: vm.domain.clone(),
            ip: vm.ip.clone(),
            services: opts
                .services
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "all".into()),
            registries: opts.registries.clone(),
        }
    }

    pub fn command(&self) -> String {
        format!(
            "sudo -H {PROVISIONER} \"{}\" \"{}\" \"{}\" \"{}\"",
            self.domain,
            self.ip,
            self.services,
            self.registries.join(",")
        )
    }
}

pub(super) async fn write_options<B: Backend>(
    vbox: &VBox<B>,
    vm: &VmConfig,
    options: &ProvisionOptions,
) -> Result<(), PcfDevError> {
    let json = facet_json::to_string(options).map_err(|e| PcfDevError::Json {
        what: "provision options".into(),
        message: e.to_string(),
    })?;
    let key = vbox.guest_key().await?;
    vbox.shell
        .run(
            &format!("echo {} | sudo tee {OPTIONS_PATH}", shell_escape(&json)),
            &guest_addresses(vm),
            &key,
            LONG_TIMEOUT,
        )
        .await?;
    Ok(())
}

pub(super) async fn run_provisioner<B: Backend>(
    vbox: &VBox<B>,
    vm: &VmConfig,
    options: &ProvisionOptions,
) -> Result<(), PcfDevError> {
    tracing::info!(name = %vm.name, services = %options.services, "provisioning");
    let key = vbox.guest_key().await?;
    vbox.shell
        .run(&options.command(), &guest_addresses(vm), &key, LONG_TIMEOUT)
        .await?;
    tracing::info!(name = %vm.name, "provisioning finished");
    Ok(())
}

/// Rerun the provisioner with the options stored in the guest.
pub(super) async fn reprovision<B: Backend>(
    vbox: &VBox<B>,
    vm: &VmConfig,
) -> Result<(), PcfDevError> {
    let key = vbox.guest_key().await?;
    let addresses = guest_addresses(vm);

    vbox.shell
        .run(
            &format!("if [ -e {OPTIONS_PATH} ]; then exit 0; else exit 1; fi"),
            &addresses,
            &key,
            SHORT_TIMEOUT,
        )
        .await
        .map_err(|_| PcfDevError::MissingProvisionConfig)?;

    let stored = vbox
        .shell
        .output(&format!("cat {OPTIONS_PATH}"), &addresses, &key, SHORT_TIMEOUT)
        .await?;
    let options =
        facet_json::from_str::<ProvisionOptions>(stored.trim()).map_err(|e| PcfDevError::Json {
            what: OPTIONS_PATH.into(),
            message: e.to_string(),
        })?;

    run_provisioner(vbox, vm, &options).await
}
