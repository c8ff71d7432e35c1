//! SSH backend adapter built on the russh client.
//!
//! Provides the shared connect/authenticate primitive used by the
//! one-shot [`execute`] path, the NETCONF adapter, and the bastion's
//! interactive proxy handoff.

use std::sync::Arc;

use russh::client::{self, Handle, Msg};
use russh::keys::{HashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use tracing::{debug, warn};

use netgw_core::{GatewayError, GatewayResult};

use super::{CommandOutcome, CONNECT_TIMEOUT};

/// russh client handler carrying the host key policy.
///
/// Any host key is accepted unless the device's config entry pins
/// `pinned_sha256` fingerprints, in which case only those match.
pub struct DeviceHandler {
    host: String,
    pinned_sha256: Vec<String>,
}

impl client::Handler for DeviceHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.pinned_sha256.is_empty() {
            return Ok(true);
        }
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        if self.pinned_sha256.iter().any(|p| p == &fingerprint) {
            Ok(true)
        } else {
            warn!(host = %self.host, %fingerprint, "host key does not match pinned fingerprints");
            Ok(false)
        }
    }
}

/// Connect and authenticate to a device's SSH endpoint.
///
/// Password authentication is tried first; if the device insists on
/// keyboard-interactive (common on network operating systems), every
/// prompt is answered with the same secret.
pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    secret: &str,
    pinned_sha256: &[String],
) -> GatewayResult<Handle<DeviceHandler>> {
    let config = Arc::new(client::Config::default());
    let handler = DeviceHandler {
        host: host.to_string(),
        pinned_sha256: pinned_sha256.to_vec(),
    };

    debug!(%host, port, %username, "connecting to ssh backend");

    let mut session = tokio::time::timeout(
        CONNECT_TIMEOUT,
        client::connect(config, (host, port), handler),
    )
    .await
    .map_err(|_| GatewayError::Timeout(format!("connecting to {host}:{port}")))?
    .map_err(|e| GatewayError::Unavailable(format!("failed to dial ssh {host}:{port}: {e}")))?;

    authenticate(&mut session, username, secret).await?;
    Ok(session)
}

async fn authenticate(
    session: &mut Handle<DeviceHandler>,
    username: &str,
    secret: &str,
) -> GatewayResult<()> {
    let result = session
        .authenticate_password(username, secret)
        .await
        .map_err(|e| GatewayError::Unavailable(format!("password authentication failed: {e}")))?;
    if result.success() {
        return Ok(());
    }

    // Keyboard-interactive fallback: answer every prompt with the secret.
    let mut response = session
        .authenticate_keyboard_interactive_start(username, None::<String>)
        .await
        .map_err(|e| {
            GatewayError::Unavailable(format!("keyboard-interactive authentication failed: {e}"))
        })?;
    loop {
        use russh::client::KeyboardInteractiveAuthResponse;
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let answers = vec![secret.to_string(); prompts.len()];
                response = session
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(|e| {
                        GatewayError::Unavailable(format!(
                            "keyboard-interactive authentication failed: {e}"
                        ))
                    })?;
            }
            _ => {
                return Err(GatewayError::AuthRejected(format!(
                    "all authentication methods rejected for user {username}"
                )));
            }
        }
    }
}

/// Open an interactive shell channel with a PTY on an authenticated
/// session. Used by the bastion when proxying a live session.
pub async fn open_shell(
    session: &Handle<DeviceHandler>,
    term: &str,
    cols: u32,
    rows: u32,
) -> GatewayResult<Channel<Msg>> {
    let channel = session
        .channel_open_session()
        .await
        .map_err(|e| GatewayError::Unavailable(format!("failed to open session channel: {e}")))?;
    channel
        .request_pty(true, term, cols, rows, 0, 0, &[])
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to request pty: {e}")))?;
    channel
        .request_shell(true)
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to start shell: {e}")))?;
    Ok(channel)
}

/// Run one command on a device and capture its combined output.
pub async fn execute(
    host: &str,
    port: u16,
    username: &str,
    secret: &str,
    command: &str,
    pinned_sha256: &[String],
) -> CommandOutcome {
    let mut output = String::new();
    match run(&mut output, host, port, username, secret, command, pinned_sha256).await {
        Ok(()) => CommandOutcome::success(output),
        Err(e) => CommandOutcome::failure(output, e),
    }
}

async fn run(
    output: &mut String,
    host: &str,
    port: u16,
    username: &str,
    secret: &str,
    command: &str,
    pinned_sha256: &[String],
) -> GatewayResult<()> {
    let session = connect(host, port, username, secret, pinned_sha256).await?;

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| GatewayError::Unavailable(format!("failed to open session channel: {e}")))?;

    debug!(%command, "executing ssh command");
    channel
        .exec(true, command)
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to send command: {e}")))?;

    let mut exit_status: Option<u32> = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => {
                output.push_str(&String::from_utf8_lossy(data));
            }
            ChannelMsg::ExtendedData { ref data, .. } => {
                output.push_str(&String::from_utf8_lossy(data));
            }
            ChannelMsg::ExitStatus { exit_status: code } => {
                exit_status = Some(code);
            }
            _ => {}
        }
    }

    let _ = session
        .disconnect(Disconnect::ByApplication, "", "en")
        .await;

    match exit_status {
        Some(code) if code != 0 => Err(GatewayError::Backend(format!(
            "command exited with status {code}"
        ))),
        _ => Ok(()),
    }
}
