use super::provision::{self, ProvisionOptions};
use super::{
    DESTROYED, Lifecycle, NOW_RUNNING, Outcome, StartOpts, ensure_no_conflict, invalid_state,
    verify_created_opts,
};
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::error::PcfDevError;
use crate::vbox::VBox;

pub struct Stopped<'a, B: Backend> {
    vm: VmConfig,
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> Stopped<'a, B> {
    pub(super) fn new(vm: VmConfig, vbox: &'a VBox<B>) -> Self {
        Self { vm, vbox }
    }

    pub fn name(&self) -> &str {
        &self.vm.name
    }
}

impl<B: Backend> Lifecycle for Stopped<'_, B> {
    async fn start(&self, opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "start").await?;

        self.vbox
            .start_vm(&self.vm)
            .await
            .map_err(|e| PcfDevError::operation("start", e))?;

        let options = ProvisionOptions::new(&self.vm, opts);
        provision::write_options(self.vbox, &self.vm, &options)
            .await
            .map_err(|e| PcfDevError::operation("start", e))?;

        if opts.no_provision {
            tracing::info!(name = %self.vm.name, "skipping provisioning");
            return Ok(Outcome::changed(
                "PCF Dev VM started without provisioning, run `pcfdev provision` to provision it",
            ));
        }

        provision::run_provisioner(self.vbox, &self.vm, &options)
            .await
            .map_err(|e| PcfDevError::operation("provision", e))?;
        Ok(Outcome::changed(NOW_RUNNING))
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "stop").await?;
        Ok(Outcome::unchanged("PCF Dev is stopped"))
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "suspend").await?;
        Err(invalid_state("PCF Dev is stopped and cannot be suspended"))
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "resume").await?;
        Err(invalid_state(
            "PCF Dev is stopped, there is nothing to resume; run `pcfdev start` instead",
        ))
    }

    fn status(&self) -> String {
        "Stopped".into()
    }

    async fn destroy(&self) -> Result<Outcome, PcfDevError> {
        self.vbox
            .power_off_and_destroy_vm(&self.vm)
            .await
            .map_err(|e| PcfDevError::operation("destroy", e))?;
        Ok(Outcome::changed(DESTROYED))
    }

    async fn provision(&self) -> Result<Outcome, PcfDevError> {
        Err(invalid_state(
            "PCF Dev is stopped; run `pcfdev start` before provisioning",
        ))
    }

    async fn verify_start_opts(&self, opts: &StartOpts) -> Result<(), PcfDevError> {
        verify_created_opts(opts)
    }
}
