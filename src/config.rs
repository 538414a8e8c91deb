use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::PcfDevError;
use crate::paths;

/// Every VM this tool owns is named with this prefix.
pub const OWNED_PREFIX: &str = "pcfdev-";

/// Name of the VM created from the stock image.
pub const DEFAULT_VM_NAME: &str = concat!("pcfdev-v", env!("CARGO_PKG_VERSION"));

/// Name of the VM created from a user-supplied image.
pub const CUSTOM_VM_NAME: &str = "pcfdev-custom";

// ── file config ───────────────────────────────────────────

/// Shape of the optional `<home>/config.toml`.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct FileConfig {
    #[facet(default)]
    pub vm: VmSection,
    #[facet(default)]
    pub ssh: SshSection,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct VmSection {
    #[facet(default = "")]
    pub default_name: String,
    #[facet(default = 4096)]
    pub memory_mb: u64,
    #[facet(default = 3072)]
    pub min_memory_mb: u64,
    #[facet(default = 2)]
    pub cpus: u32,
    #[facet(default)]
    pub image: String,
}

impl Default for VmSection {
    fn default() -> Self {
        Self {
            default_name: String::new(),
            memory_mb: 4096,
            min_memory_mb: 3072,
            cpus: 2,
            image: String::new(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct SshSection {
    #[facet(default = "vcap")]
    pub user: String,
    #[facet(default)]
    pub insecure_key: String,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            user: "vcap".into(),
            insecure_key: String::new(),
        }
    }
}

// ── resolved config ───────────────────────────────────────

/// Runtime configuration resolved once per command invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub vm_dir: PathBuf,
    pub ova_dir: PathBuf,
    pub private_key_path: PathBuf,
    pub insecure_private_key_path: PathBuf,

    pub default_vm_name: String,
    pub default_memory_mb: u64,
    pub min_memory_mb: u64,
    pub default_cpus: u32,
    pub default_image_path: PathBuf,
    pub ssh_user: String,

    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

impl Config {
    /// Build a config rooted at `home` from parsed file settings. Proxy
    /// settings start empty; `load_config` fills them from the environment.
    pub fn from_file(home: &Path, file: FileConfig) -> Self {
        let vm_dir = paths::vm_dir(home);
        let ova_dir = paths::ova_dir(home);
        let default_vm_name = if file.vm.default_name.is_empty() {
            DEFAULT_VM_NAME.to_string()
        } else {
            file.vm.default_name
        };
        let default_image_path = if file.vm.image.is_empty() {
            ova_dir.join(format!("{default_vm_name}.ova"))
        } else {
            PathBuf::from(file.vm.image)
        };
        let insecure_private_key_path = if file.ssh.insecure_key.is_empty() {
            paths::insecure_private_key_path(home)
        } else {
            PathBuf::from(file.ssh.insecure_key)
        };

        Self {
            home: home.to_path_buf(),
            private_key_path: paths::private_key_path(home),
            insecure_private_key_path,
            vm_dir,
            ova_dir,
            default_vm_name,
            default_memory_mb: file.vm.memory_mb,
            min_memory_mb: file.vm.min_memory_mb,
            default_cpus: file.vm.cpus,
            default_image_path,
            ssh_user: file.ssh.user,
            http_proxy: String::new(),
            https_proxy: String::new(),
            no_proxy: String::new(),
        }
    }

    /// Config rooted at `home` with all defaults.
    pub fn for_home(home: &Path) -> Self {
        Self::from_file(home, FileConfig::default())
    }

    pub fn with_proxies(mut self, http: &str, https: &str, no_proxy: &str) -> Self {
        self.http_proxy = http.to_string();
        self.https_proxy = https.to_string();
        self.no_proxy = no_proxy.to_string();
        self
    }
}

// ── per-VM config ─────────────────────────────────────────

/// Everything known about one VM. Fields learned from the hypervisor are
/// empty (or zero) until the VM has been imported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmConfig {
    pub name: String,
    pub ip: String,
    pub domain: String,
    pub ssh_port: u16,
    pub memory_mb: u64,
    pub cpus: u32,
    pub image_path: PathBuf,
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), PcfDevError> {
    if config.default_cpus < 1 {
        return Err(PcfDevError::validation("cpus must be at least 1"));
    }
    if config.default_memory_mb < config.min_memory_mb {
        return Err(PcfDevError::validation(format!(
            "memory_mb must be at least {} (got {})",
            config.min_memory_mb, config.default_memory_mb
        )));
    }
    if !config.default_vm_name.starts_with(OWNED_PREFIX)
        || config.default_vm_name.len() == OWNED_PREFIX.len()
    {
        return Err(PcfDevError::validation(format!(
            "default VM name must start with '{OWNED_PREFIX}' (got '{}')",
            config.default_vm_name
        )));
    }
    Ok(())
}

// ── loading ───────────────────────────────────────────────

/// First non-empty value among the upper- and lower-case spellings of a proxy variable.
fn proxy_from_env(name: &str) -> String {
    [name.to_ascii_uppercase(), name.to_ascii_lowercase()]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Resolve the runtime config. `explicit` overrides `<home>/config.toml`;
/// an explicit path must exist, the default one is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, PcfDevError> {
    let home = paths::home_dir();
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => (paths::config_file(&home), false),
    };

    let file = if required || path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|source| PcfDevError::ConfigLoad {
            path: path.display().to_string(),
            source,
        })?;
        facet_toml::from_str::<FileConfig>(&contents).map_err(|e| PcfDevError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
    } else {
        FileConfig::default()
    };

    let config = Config::from_file(&home, file).with_proxies(
        &proxy_from_env("http_proxy"),
        &proxy_from_env("https_proxy"),
        &proxy_from_env("no_proxy"),
    );
    validate_config(&config)?;

    tracing::debug!(home = %config.home.display(), vm = %config.default_vm_name, "config loaded");
    Ok(config)
}
