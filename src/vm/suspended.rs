use super::{
    DESTROYED, Lifecycle, NOW_RUNNING, Outcome, StartOpts, ensure_no_conflict, invalid_state,
    verify_created_opts,
};
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::error::PcfDevError;
use crate::vbox::VBox;

pub struct Suspended<'a, B: Backend> {
    vm: VmConfig,
    /// Paused in memory rather than saved to disk.
    paused: bool,
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> Suspended<'a, B> {
    pub(super) fn new(vm: VmConfig, paused: bool, vbox: &'a VBox<B>) -> Self {
        Self { vm, paused, vbox }
    }

    pub fn name(&self) -> &str {
        &self.vm.name
    }
}

impl<B: Backend> Lifecycle for Suspended<'_, B> {
    async fn start(&self, _opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "start").await?;
        Err(invalid_state(
            "PCF Dev is suspended, run `pcfdev resume` to continue using it",
        ))
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "stop").await?;
        Err(invalid_state(
            "PCF Dev is suspended, run `pcfdev resume` before stopping it",
        ))
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "suspend").await?;
        Ok(Outcome::unchanged("PCF Dev is already suspended"))
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.vm.name, "resume").await?;

        tracing::info!(name = %self.vm.name, paused = self.paused, "resuming VM");
        let resumed = if self.paused {
            self.vbox.resume_paused_vm(&self.vm).await
        } else {
            self.vbox.resume_saved_vm(&self.vm).await
        };
        resumed.map_err(|e| PcfDevError::operation("resume", e))?;
        Ok(Outcome::changed(NOW_RUNNING))
    }

    fn status(&self) -> String {
        "Suspended".into()
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
            "PCF Dev is suspended, run `pcfdev resume` before provisioning",
        ))
    }

    async fn verify_start_opts(&self, opts: &StartOpts) -> Result<(), PcfDevError> {
        verify_created_opts(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_VM_NAME;
    use crate::driver::HypervisorState;
    use crate::testing::fake_vbox;

    fn vm() -> VmConfig {
        VmConfig {
            name: DEFAULT_VM_NAME.into(),
            ip: "192.168.11.11".into(),
            domain: "local.pcfdev.io".into(),
            ssh_port: 5555,
            memory_mb: 4096,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn saved_vm_resumes_by_starting() {
        let vbox = fake_vbox();
        vbox.driver.register(DEFAULT_VM_NAME, HypervisorState::Saved);

        let outcome = Suspended::new(vm(), false, &vbox).resume().await.unwrap();
        assert_eq!(outcome, Outcome::changed(NOW_RUNNING));
        assert!(vbox.journal().contains(&format!("driver start_vm {DEFAULT_VM_NAME}")));
        assert!(!vbox.journal().any_starting_with("driver resume_vm"));
    }

    #[tokio::test]
    async fn paused_vm_resumes_in_place() {
        let vbox = fake_vbox();
        vbox.driver.register(DEFAULT_VM_NAME, HypervisorState::Paused);

        Suspended::new(vm(), true, &vbox).resume().await.unwrap();
        assert!(vbox.journal().contains(&format!("driver resume_vm {DEFAULT_VM_NAME}")));
        assert_eq!(vbox.driver.state_of(DEFAULT_VM_NAME), Some(HypervisorState::Running));
    }

    #[tokio::test]
    async fn resume_failure_is_wrapped() {
        let vbox = fake_vbox();
        vbox.driver.fail_on("start_vm");

        let err = Suspended::new(vm(), false, &vbox).resume().await.unwrap_err();
        assert!(err.to_string().starts_with("failed to resume VM: "));
    }

    #[tokio::test]
    async fn start_and_stop_require_resume_first() {
        let vbox = fake_vbox();
        let suspended = Suspended::new(vm(), false, &vbox);

        assert!(suspended.start(&StartOpts::default()).await.is_err());
        assert!(suspended.stop().await.is_err());
        assert!(suspended.provision().await.is_err());
        assert_eq!(
            suspended.suspend().await.unwrap(),
            Outcome::unchanged("PCF Dev is already suspended")
        );
        assert_eq!(suspended.status(), "Suspended");
        assert!(!vbox.journal().any_starting_with("driver start_vm"));
    }

    #[tokio::test]
    async fn conflict_precedes_resume() {
        let vbox = fake_vbox();
        vbox.driver.set_vms(&[DEFAULT_VM_NAME, "pcfdev-0.0.0"]);

        let err = Suspended::new(vm(), false, &vbox).resume().await.unwrap_err();
        assert!(err.is_conflict());
        assert!(!vbox.journal().any_starting_with("driver start_vm"));
    }

    #[tokio::test]
    async fn destroy_powers_off_first() {
        let vbox = fake_vbox();
        vbox.driver.register(DEFAULT_VM_NAME, HypervisorState::Saved);

        Suspended::new(vm(), false, &vbox).destroy().await.unwrap();
        let entries = vbox.journal().entries();
        assert_eq!(
            entries,
            vec![
                format!("driver power_off_vm {DEFAULT_VM_NAME}"),
                format!("driver destroy_vm {DEFAULT_VM_NAME}"),
                format!("fs remove /pcfdev/vms/{DEFAULT_VM_NAME}"),
                "fs remove /pcfdev/key.pem".to_string(),
            ]
        );
    }
}
