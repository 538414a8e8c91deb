use std::path::{Path, PathBuf};

/// Environment variable that overrides the PCF Dev home directory.
pub const HOME_ENV: &str = "PCFDEV_HOME";

/// PCF Dev home: `$PCFDEV_HOME` or `~/.pcfdev/`
pub fn home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".pcfdev")
}

/// Base directory the hypervisor registers VMs under: `<home>/vms/`
pub fn vm_dir(home: &Path) -> PathBuf {
    home.join("vms")
}

/// Directory holding downloaded images: `<home>/ova/`
pub fn ova_dir(home: &Path) -> PathBuf {
    home.join("ova")
}

/// Private key injected into the guest on first boot.
pub fn private_key_path(home: &Path) -> PathBuf {
    home.join("key.pem")
}

/// Insecure bootstrap key shipped alongside the image.
pub fn insecure_private_key_path(home: &Path) -> PathBuf {
    home.join("insecure.key")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    home.join("logs")
}

/// Optional TOML config file: `<home>/config.toml`
pub fn config_file(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Per-VM directory created by the hypervisor: `<vm_dir>/<name>/`
pub fn vm_work_dir(vm_dir: &Path, name: &str) -> PathBuf {
    vm_dir.join(name)
}

/// Network identity record for a VM: `<vm_dir>/<name>/vm_config.json`
pub fn vm_record_path(vm_dir: &Path, name: &str) -> PathBuf {
    vm_work_dir(vm_dir, name).join("vm_config.json")
}

/// Staging path for the still-compressed disk: `<vm_dir>/<name>-disk1.vmdk.compressed`
pub fn compressed_disk_path(vm_dir: &Path, name: &str) -> PathBuf {
    vm_dir.join(format!("{name}-disk1.vmdk.compressed"))
}

/// Final disk path: `<vm_dir>/<name>/<name>-disk1.vmdk`
pub fn disk_path(vm_dir: &Path, name: &str) -> PathBuf {
    vm_work_dir(vm_dir, name).join(format!("{name}-disk1.vmdk"))
}
