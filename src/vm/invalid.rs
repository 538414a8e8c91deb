use super::{DESTROYED, Lifecycle, Outcome, StartOpts, ensure_no_conflict, invalid_state};
use crate::backend::Backend;
use crate::error::PcfDevError;
use crate::vbox::VBox;

pub const INVALID_GUIDANCE: &str =
    "PCF Dev is in an invalid state. Please run `pcfdev destroy` to remove it";

/// The VM's identity could not be resolved. Only `destroy` is possible.
pub struct Invalid<'a, B: Backend> {
    name: String,
    /// Which lookup failed, for diagnostics.
    reason: String,
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> Invalid<'a, B> {
    pub(super) fn new(name: &str, reason: String, vbox: &'a VBox<B>) -> Self {
        tracing::warn!(name, reason, "VM is in an invalid state");
        Self {
            name: name.to_string(),
            reason,
            vbox,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    async fn refuse(&self, action: &'static str) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.name, action).await?;
        Err(invalid_state(INVALID_GUIDANCE))
    }
}

impl<B: Backend> Lifecycle for Invalid<'_, B> {
    async fn start(&self, _opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        self.refuse("start").await
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        self.refuse("stop").await
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        self.refuse("suspend").await
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        self.refuse("resume").await
    }

    fn status(&self) -> String {
        INVALID_GUIDANCE.into()
    }

    /// Sweep every owned VM and disk, then the leftover directory.
    async fn destroy(&self) -> Result<Outcome, PcfDevError> {
        self.vbox
            .destroy_pcfdev_vms()
            .await
            .map_err(|e| PcfDevError::operation("destroy", e))?;
        self.vbox
            .remove_vm_dir(&self.name)
            .await
            .map_err(|e| PcfDevError::operation("destroy", e))?;
        Ok(Outcome::changed(DESTROYED))
    }

    async fn provision(&self) -> Result<Outcome, PcfDevError> {
        Err(invalid_state(INVALID_GUIDANCE))
    }

    async fn verify_start_opts(&self, _opts: &StartOpts) -> Result<(), PcfDevError> {
        Err(invalid_state(INVALID_GUIDANCE))
    }
}
