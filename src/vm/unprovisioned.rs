use super::provision;
use super::{
    DESTROYED, Lifecycle, NOW_STOPPED, Outcome, StartOpts, ensure_no_conflict, invalid_state,
};
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::error::PcfDevError;
use crate::vbox::VBox;

pub const UNPROVISIONED_GUIDANCE: &str = "PCF Dev is in an invalid state. Please run `pcfdev destroy` or `pcfdev stop` before attempting to start again";

/// Booted, but the guest health check did not pass.
pub struct Unprovisioned<'a, B: Backend> {
    vm: VmConfig,
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> Unprovisioned<'a, B> {
    pub(super) fn new(vm: VmConfig, vbox: &'a VBox<B>) -> Self {
        Self { vm, vbox }
    }

    pub fn name(&self) -> &str {
        &self.vm.name
    }
}

impl<B: Backend> Lifecycle for Unprovisioned<'_, B> {
    async fn start(&self, _opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "start").await?;
        Err(invalid_state(UNPROVISIONED_GUIDANCE))
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "stop").await?;
        self.vbox
            .stop_vm(&self.vm)
            .await
            .map_err(|e| PcfDevError::operation("stop", e))?;
        Ok(Outcome::changed(NOW_STOPPED))
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "suspend").await?;
        Err(invalid_state(UNPROVISIONED_GUIDANCE))
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "resume").await?;
        Err(invalid_state(UNPROVISIONED_GUIDANCE))
    }

    fn status(&self) -> String {
        UNPROVISIONED_GUIDANCE.into()
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

    async fn verify_start_opts(&self, _opts: &StartOpts) -> Result<(), PcfDevError> {
        Err(invalid_state(UNPROVISIONED_GUIDANCE))
    }
}
