use super::{Builder, Lifecycle, Outcome, StartOpts, Vm, ensure_no_conflict, invalid_state};
use crate::backend::Backend;
use crate::config::VmConfig;
use crate::driver::Driver;
use crate::error::PcfDevError;
use crate::fs::HostFs;
use crate::vbox::VBox;

const NOT_CREATED: &str = "PCF Dev VM has not been created";

pub struct NotCreated<'a, B: Backend> {
    name: String,
    vbox: &'a VBox<B>,
}

impl<'a, B: Backend> NotCreated<'a, B> {
    pub(super) fn new(name: &str, vbox: &'a VBox<B>) -> Self {
        Self {
            name: name.to_string(),
            vbox,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The config the VM will be imported with: overrides, else defaults.
    fn import_config(&self, opts: &StartOpts) -> VmConfig {
        let config = &self.vbox.config;
        VmConfig {
            name: self.name.clone(),
            memory_mb: opts.memory_mb.unwrap_or(config.default_memory_mb),
            cpus: opts.cpus.unwrap_or(config.default_cpus),
            image_path: opts
                .image_path
                .clone()
                .unwrap_or_else(|| config.default_image_path.clone()),
            ..Default::default()
        }
    }
}

impl<B: Backend> Lifecycle for NotCreated<'_, B> {
    async fn start(&self, opts: &StartOpts) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.name, "start").await?;

        let vm = self.import_config(opts);
        tracing::info!(name = %vm.name, "importing VM");
        self.vbox
            .import_vm(&vm)
            .await
            .map_err(|e| PcfDevError::operation("start", e))?;

        let imported = Builder::new(self.vbox)
            .vm(&self.name)
            .await
            .map_err(|e| PcfDevError::operation("start", e))?;
        match imported {
            Vm::Stopped(stopped) => stopped.start(opts).await,
            other => Err(PcfDevError::operation(
                "start",
                invalid_state(format!(
                    "imported VM is not stopped, status: {}",
                    other.status()
                )),
            )),
        }
    }

    async fn stop(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.name, "stop").await?;
        Ok(Outcome::unchanged(NOT_CREATED))
    }

    async fn suspend(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.name, "suspend").await?;
        Ok(Outcome::unchanged("No VM running, cannot suspend."))
    }

    async fn resume(&self) -> Result<Outcome, PcfDevError> {
        ensure_no_conflict(self.vbox, &self.name, "resume").await?;
        Ok(Outcome::unchanged("No VM suspended, cannot resume."))
    }

    fn status(&self) -> String {
        "Not Created".into()
    }

    async fn destroy(&self) -> Result<Outcome, PcfDevError> {
        Ok(Outcome::unchanged(NOT_CREATED))
    }

    async fn provision(&self) -> Result<Outcome, PcfDevError> {
        Err(invalid_state(NOT_CREATED))
    }

    async fn verify_start_opts(&self, opts: &StartOpts) -> Result<(), PcfDevError> {
        let config = &self.vbox.config;
        if let Some(memory_mb) = opts.memory_mb {
            if memory_mb < config.min_memory_mb {
                return Err(PcfDevError::validation(format!(
                    "PCF Dev requires at least {} MB of memory to run",
                    config.min_memory_mb
                )));
            }
        }
        if opts.cpus == Some(0) {
            return Err(PcfDevError::validation("PCF Dev requires at least 1 core"));
        }
        if let Some(image) = &opts.image_path {
            if self.vbox.driver.vm_exists(&config.default_vm_name).await? {
                return Err(PcfDevError::validation(
                    "you must destroy your existing VM to use a custom image",
                ));
            }
            if !self.vbox.fs.exists(image).await? {
                return Err(PcfDevError::validation(format!(
                    "custom image not found at {}",
                    image.display()
                )));
            }
        }
        Ok(())
    }
}
