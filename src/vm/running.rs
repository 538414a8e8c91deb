use super::provision;
use super::{
    DESTROYED, Lifecycle, NOW_STOPPED, Outcome, StartOpts, ensure_no_conflict,
    verify_created_opts,
};
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::error::PcfDevError;
use crate::vbox::VBox;

const RUNNING: &str = "PCF Dev is running";

pub struct Running<'a, B: Backend> {
    vm: VmConfig,
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> Running<'a, B> {
    pub(super) fn new(vm: VmConfig, vbox: &'a VBox<B>) -> Self {
        Self { vm, vbox }
    }

    pub fn name(&self) -> &str {
        &self.vm.name
    }
}

impl<B: Backend> Lifecycle for Running<'_, B> {
    async fn start(&self, _opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "start").await?;
        Ok(Outcome::unchanged(RUNNING))
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "stop").await?;
        tracing::info!(name = %self.vm.name, "stopping VM");
        self.vbox
            .stop_vm(&self.vm)
            .await
            .map_err(|e| PcfDevError::operation("stop", e))?;
        Ok(Outcome::changed(NOW_STOPPED))
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "suspend").await?;
        tracing::info!(name = %self.vm.name, "suspending VM");
        self.vbox
            .suspend_vm(&self.vm)
            .await
            .map_err(|e| PcfDevError::operation("suspend", e))?;
        Ok(Outcome::changed("PCF Dev is now suspended"))
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "resume").await?;
        Ok(Outcome::unchanged(RUNNING))
    }

    fn status(&self) -> String {
        "Running".into()
    }

    async fn destroy(&self) -> Result<Outcome, PcfDevError> {
        self.vbox
            .power_off_and_destroy_vm(&self.vm)
            .await
            .map_err(|e| PcfDevError::operation("destroy", e))?;
        Ok(Outcome::changed(DESTROYED))
    }

    async fn provision(&self) -> Result<Outcome, PcfDevError> {
        provision::reprovision(self.vbox, &self.vm)
            .await
            .map_err(|e| PcfDevError::operation("provision", e))?;
        Ok(Outcome::changed("PCF Dev has been provisioned"))
    }

    async fn verify_start_opts(&self, opts: &StartOpts) -> Result<(), PcfDevError> {
        verify_created_opts(opts)
    }
}
