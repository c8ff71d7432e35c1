//! Backend protocol adapters.
//!
//! One submodule per protocol the gateway can speak towards a device:
//! interactive shell over SSH, the legacy telnet line protocol, NETCONF
//! over the SSH subsystem, and gNMI. The first three share the
//! [`CommandOutcome`] shape: output is always returned, even partially,
//! so callers can surface whatever the device produced before a failure.

pub mod gnmi;
pub mod netconf;
pub mod ssh;
pub mod telnet;

use std::time::Duration;

use netgw_core::{DeviceEntry, GatewayError};

/// Deadline for establishing a backend connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The backend protocol selected by a request's protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProtocol {
    Ssh,
    Telnet,
    Netconf,
}

impl BackendProtocol {
    /// Map a request protocol tag to an adapter. An empty tag selects
    /// SSH; unknown tags select nothing.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "" | "ssh" => Some(Self::Ssh),
            "telnet" => Some(Self::Telnet),
            "netconf" => Some(Self::Netconf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Telnet => "telnet",
            Self::Netconf => "netconf",
        }
    }
}

/// Outcome of a one-shot command against a backend device.
///
/// `output` holds everything the device produced, including partial
/// output accumulated before a failure.
#[derive(Debug)]
pub struct CommandOutcome {
    pub output: String,
    pub error: Option<GatewayError>,
}

impl CommandOutcome {
    pub fn success(output: String) -> Self {
        Self {
            output,
            error: None,
        }
    }

    pub fn failure(output: String, error: GatewayError) -> Self {
        Self {
            output,
            error: Some(error),
        }
    }

    /// 0 on success, 1 on any adapter failure.
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() {
            1
        } else {
            0
        }
    }
}

/// Run one command on `entry` over the given protocol, dialing the
/// entry's port for that protocol.
pub async fn execute(
    protocol: BackendProtocol,
    entry: &DeviceEntry,
    username: &str,
    secret: &str,
    command: &str,
) -> CommandOutcome {
    match protocol {
        BackendProtocol::Ssh => {
            ssh::execute(
                &entry.hostname,
                entry.ssh_port,
                username,
                secret,
                command,
                &entry.pinned_sha256,
            )
            .await
        }
        BackendProtocol::Telnet => {
            telnet::execute(&entry.hostname, entry.telnet_port, username, secret, command).await
        }
        BackendProtocol::Netconf => {
            netconf::execute(
                &entry.hostname,
                entry.netconf_port,
                username,
                secret,
                command,
                &entry.pinned_sha256,
            )
            .await
        }
    }
}
