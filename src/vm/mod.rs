//! Lifecycle variants of the one dev VM.
//!
//! A `Vm` is derived fresh by the [`Builder`] for every command and exposes
//! the same operations in every variant; what each operation does depends
//! on the variant.

mod builder;
mod invalid;
mod not_created;
mod provision;
mod running;
mod stopped;
mod suspended;
mod unprovisioned;

use std::fmt;
use std::path::PathBuf;

pub use builder::Builder;
pub use invalid::Invalid;
pub use not_created::NotCreated;
pub use provision::{OPTIONS_PATH, ProvisionOptions};
pub use running::Running;
pub use stopped::Stopped;
pub use suspended::Suspended;
pub use unprovisioned::Unprovisioned;

use crate::backend::Backend;
use crate::error::PcfDevError;
use crate::vbox::VBox;

/// User-requested overrides for `start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOpts {
    pub memory_mb: Option<u64>,
    pub cpus: Option<u32>,
    pub image_path: Option<PathBuf>,
    /// Comma-separated service list; `all` when unset.
    pub services: Option<String>,
    /// Insecure docker registries the guest should trust.
    pub registries: Vec<String>,
    pub no_provision: bool,
}

/// What an operation did, as a message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Changed(String),
    Unchanged(String),
}

impl Outcome {
    pub fn changed(message: impl Into<String>) -> Self {
        Outcome::Changed(message.into())
    }

    pub fn unchanged(message: impl Into<String>) -> Self {
        Outcome::Unchanged(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Changed(m) | Outcome::Unchanged(m) => m,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Lifecycle {
    async fn start(&self, opts: &StartOpts) -> Result<Outcome, PcfDevError>;
    async fn stop(&self) -> Result<Outcome, PcfDevError>;
    async fn suspend(&self) -> Result<Outcome, PcfDevError>;
    async fn resume(&self) -> Result<Outcome, PcfDevError>;
    fn status(&self) -> String;
    async fn destroy(&self) -> Result<Outcome, PcfDevError>;
    async fn provision(&self) -> Result<Outcome, PcfDevError>;
    /// Reject overrides this variant cannot honor, before anything runs.
    async fn verify_start_opts(&self, opts: &StartOpts) -> Result<(), PcfDevError>;
}

pub enum Vm<'a, B: Backend> {
    NotCreated(NotCreated<'a, B>),
    Stopped(Stopped<'a, B>),
    Suspended(Suspended<'a, B>),
    Running(Running<'a, B>),
    Unprovisioned(Unprovisioned<'a, B>),
    Invalid(Invalid<'a, B>),
}

macro_rules! each_variant {
    ($vm:expr, $v:ident => $body:expr) => {
        match $vm {
            Vm::NotCreated($v) => $body,
            Vm::Stopped($v) => $body,
            Vm::Suspended($v) => $body,
            Vm::Running($v) => $body,
            Vm::Unprovisioned($v) => $body,
            Vm::Invalid($v) => $body,
        }
    };
}

impl<B: Backend> Vm<'_, B> {
    pub fn name(&self) -> &str {
        each_variant!(self, v => v.name())
    }
}

impl<B: Backend> Lifecycle for Vm<'_, B> {
    async fn start(&self, opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        each_variant!(self, v => v.start(opts).await)
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        each_variant!(self, v => v.stop().await)
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        each_variant!(self, v => v.suspend().await)
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        each_variant!(self, v => v.resume().await)
    }

    fn status(&self) -> String {
        each_variant!(self, v => v.status())
    }

    async fn destroy(&self) -> Result<Outcome, PcfDevError> {
        each_variant!(self, v => v.destroy().await)
    }

    async fn provision(&self) -> Result<Outcome, PcfDevError> {
        each_variant!(self, v => v.provision().await)
    }

    async fn verify_start_opts(&self, opts: &StartOpts) -> Result<(), PcfDevError> {
        each_variant!(self, v => v.verify_start_opts(opts).await)
    }
}

// ── shared checks ─────────────────────────────────────────

const DESTROYED: &str = "PCF Dev VM has been destroyed";
const NOW_RUNNING: &str = "PCF Dev is now running";
const NOW_STOPPED: &str = "PCF Dev is now stopped";

/// Fails with the old-VM error if another owned VM is registered.
async fn ensure_no_conflict<B: Backend>(
    vbox: &VBox<B>,
    name: &str,
    action: &'static str,
) -> Result<(), PcfDevError> {
    match vbox.conflicting_vm_present(name).await {
        Ok(false) => Ok(()),
        Ok(true) => Err(PcfDevError::OldVm),
        Err(e) => Err(PcfDevError::operation(action, e)),
    }
}

/// Sizing and image are fixed once a VM exists.
fn verify_created_opts(opts: &StartOpts) -> Result<(), PcfDevError> {
    if opts.memory_mb.is_some() {
        return Err(PcfDevError::validation(
            "memory cannot be changed once the vm has been created",
        ));
    }
    if opts.cpus.is_some() {
        return Err(PcfDevError::validation(
            "cores cannot be changed once the vm has been created",
        ));
    }
    if opts.image_path.is_some() {
        return Err(PcfDevError::validation(
            "a custom image cannot be used once the vm has been created, run `pcfdev destroy` first",
        ));
    }
    Ok(())
}

fn invalid_state(message: impl Into<String>) -> PcfDevError {
    PcfDevError::InvalidState {
        message: message.into(),
    }
}
