//! `GuestShell` over russh, plus local key and port generation.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::ChannelMsg;

use super::{CommandOutput, GuestShell, Keypair, SshAddress};
use crate::error::PcfDevError;

/// Accepts all server keys (like StrictHostKeyChecking=no); guest host keys
/// change with every import.
struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Why one connection attempt failed.
enum Attempt {
    /// sshd not reachable or not accepting us yet; try again.
    Unreachable(String),
    /// The command ran and failed, or the guest refused the key; do not retry.
    Failed(PcfDevError),
}

/// A rejected key will not start working on a later attempt.
fn check_auth(accepted: bool, user: &str, addr: &str) -> Result<(), Attempt> {
    if accepted {
        return Ok(());
    }
    Err(Attempt::Failed(PcfDevError::Ssh {
        message: format!("authentication rejected for user {user} on {addr}"),
        exit_status: None,
    }))
}

pub struct SshClient {
    user: String,
    retry_interval: Duration,
}

impl SshClient {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            retry_interval: Duration::from_secs(1),
        }
    }

    async fn connect(
        &self,
        address: &SshAddress,
        key: &Arc<keys::PrivateKey>,
    ) -> Result<client::Handle<SshHandler>, Attempt> {
        let config = Arc::new(client::Config::default());
        let addr = address.to_string();

        let mut handle = client::connect(config, &*addr, SshHandler)
            .await
            .map_err(|e| Attempt::Unreachable(format!("connect to {addr} failed: {e}")))?;

        let key_with_alg = PrivateKeyWithHashAlg::new(key.clone(), None);
        let auth = handle
            .authenticate_publickey(&self.user, key_with_alg)
            .await
            .map_err(|e| Attempt::Unreachable(format!("authentication on {addr} failed: {e}")))?;
        check_auth(auth.success(), &self.user, &addr)?;
        Ok(handle)
    }

    async fn attempt(
        &self,
        command: &str,
        address: &SshAddress,
        key: &Arc<keys::PrivateKey>,
    ) -> Result<CommandOutput, Attempt> {
        let handle = self.connect(address, key).await?;
        let result = exec(&handle, command).await;
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
        result.map_err(Attempt::Failed)
    }

    /// Cycle through the addresses until one runs the command.
    async fn run_until_reachable(
        &self,
        command: &str,
        addresses: &[SshAddress],
        key: &Arc<keys::PrivateKey>,
    ) -> Result<CommandOutput, PcfDevError> {
        loop {
            for address in addresses {
                match self.attempt(command, address, key).await {
                    Ok(output) => return Ok(output),
                    Err(Attempt::Failed(e)) => return Err(e),
                    Err(Attempt::Unreachable(reason)) => {
                        tracing::debug!(%address, reason, "guest not reachable yet");
                    }
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

/// Run one command on a fresh channel, collecting its output and exit status.
async fn exec(
    handle: &client::Handle<SshHandler>,
    command: &str,
) -> Result<CommandOutput, PcfDevError> {
    let ssh_err = |e: russh::Error| PcfDevError::Ssh {
        message: format!("ssh command failed: {e}"),
        exit_status: None,
    };

    let mut channel = handle.channel_open_session().await.map_err(ssh_err)?;
    channel.exec(true, command).await.map_err(ssh_err)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };
    match exit_status {
        Some(0) => Ok(output),
        code => Err(PcfDevError::Ssh {
            message: format!(
                "ssh command exited with status {}: {}",
                code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                output.stderr.trim()
            ),
            exit_status: code,
        }),
    }
}

impl GuestShell for SshClient {
    async fn run(
        &self,
        command: &str,
        addresses: &[SshAddress],
        private_key: &[u8],
        timeout: Duration,
    ) -> Result<CommandOutput, PcfDevError> {
        let key_text = std::str::from_utf8(private_key).map_err(|e| PcfDevError::Ssh {
            message: format!("private key is not valid UTF-8: {e}"),
            exit_status: None,
        })?;
        let key = keys::decode_secret_key(key_text, None).map_err(|e| PcfDevError::Ssh {
            message: format!("failed to decode SSH key: {e}"),
            exit_status: None,
        })?;
        let key = Arc::new(key);

        tracing::debug!(command, ?addresses, "running guest command");
        match tokio::time::timeout(timeout, self.run_until_reachable(command, addresses, &key))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PcfDevError::Ssh {
                message: format!("ssh connection timed out after {}s", timeout.as_secs()),
                exit_status: None,
            }),
        }
    }

    fn generate_keypair(&self) -> Result<Keypair, PcfDevError> {
        let keygen = |e: ssh_key::Error| PcfDevError::Keygen {
            message: e.to_string(),
        };
        let key = ssh_key::PrivateKey::random(&mut rand_core::OsRng, ssh_key::Algorithm::Ed25519)
            .map_err(keygen)?;
        let private_key = key.to_openssh(ssh_key::LineEnding::LF).map_err(keygen)?;
        let public_key = key.public_key().to_openssh().map_err(keygen)?;

        Ok(Keypair {
            private_key: private_key.as_bytes().to_vec(),
            public_key: public_key.into_bytes(),
        })
    }

    fn generate_address(&self) -> Result<SshAddress, PcfDevError> {
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| PcfDevError::Io {
                context: "reserving a local port".into(),
                source: e,
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| PcfDevError::Io {
                context: "reading reserved local port".into(),
                source: e,
            })?
            .port();
        Ok(SshAddress::loopback(port))
    }
}
