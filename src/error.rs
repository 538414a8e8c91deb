use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PcfDevError {
    #[error("old version of PCF Dev already running, please run `pcfdev destroy` to continue")]
    #[diagnostic(help("a VM named `pcfdev-*` that this version does not manage is registered"))]
    OldVm,

    #[error("failed to execute 'VBoxManage {command}': {message}")]
    Driver { command: String, message: String },

    #[error("{message}")]
    Ssh {
        message: String,
        exit_status: Option<u32>,
    },

    #[error("failed to {action} VM: {cause}")]
    Operation {
        action: &'static str,
        cause: Box<PcfDevError>,
    },

    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    InvalidState { message: String },

    #[error("failed to handle VM state '{state}'")]
    UnknownState { state: String },

    #[error("{ip} is not one of the allowed PCF Dev ips")]
    NotAllowedIp { ip: String },

    #[error("all allowed network interfaces are currently taken")]
    NoAvailableInterface,

    #[error("multiple PCF Dev VMs found")]
    MultipleVms,

    #[error("failed to destroy all pcfdev {what}")]
    DestroyIncomplete { what: &'static str },

    #[error("missing provision configuration")]
    MissingProvisionConfig,

    #[error("{command} failed: {message}")]
    ExternalCommand { command: String, message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("failed to parse {what}: {message}")]
    Json { what: String, message: String },

    #[error("failed to generate SSH keypair: {message}")]
    Keygen { message: String },
}

impl PcfDevError {
    /// Wrap an error with the lifecycle action that failed, e.g. `failed to stop VM: ...`.
    pub fn operation(action: &'static str, cause: PcfDevError) -> Self {
        PcfDevError::Operation {
            action,
            cause: Box::new(cause),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PcfDevError::Validation {
            message: message.into(),
        }
    }

    /// True for the conflict error, which callers surface verbatim.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PcfDevError::OldVm)
    }
}
