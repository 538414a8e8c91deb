//! Guest shell interface: remote commands against the guest over SSH.

pub mod ssh;

use std::time::Duration;

use crate::error::PcfDevError;

/// Liveness probes and reads of guest files.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Key injection, guest file writes and provisioning.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One way of reaching the guest's SSH daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAddress {
    pub ip: String,
    pub port: u16,
}

impl SshAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// The NAT port forward on the host loopback.
    pub fn loopback(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }
}

impl std::fmt::Display for SshAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// OpenSSH-encoded keypair.
#[derive(Debug, Clone)]
pub struct Keypair {
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait GuestShell {
    /// Run `command` on the first of `addresses` that accepts a connection,
    /// authenticating with `private_key`. A non-zero exit is an error.
    async fn run(
        &self,
        command: &str,
        addresses: &[SshAddress],
        private_key: &[u8],
        timeout: Duration,
    ) -> Result<CommandOutput, PcfDevError>;

    /// Like `run`, returning only stdout.
    async fn output(
        &self,
        command: &str,
        addresses: &[SshAddress],
        private_key: &[u8],
        timeout: Duration,
    ) -> Result<String, PcfDevError> {
        Ok(self.run(command, addresses, private_key, timeout).await?.stdout)
    }

    fn generate_keypair(&self) -> Result<Keypair, PcfDevError>;

    /// A free host port on the loopback interface, for the SSH forward.
    fn generate_address(&self) -> Result<SshAddress, PcfDevError>;
}

/// Minimal shell escaping: wrap in single quotes, escape embedded single quotes.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
