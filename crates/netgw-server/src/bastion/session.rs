//! Bastion session handling: the interactive command loop and the
//! transparent proxy to a backend device.
//!
//! Each accepted session channel runs in its own task, reading from the
//! channel byte stream and writing straight back to it. Window-change
//! requests arrive out of band from the connection handler and are
//! forwarded to the backend while a proxy session is live.

use std::sync::Arc;

use russh::ChannelMsg;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use netgw_core::{DeviceEntry, DeviceRegistry, GatewayResult};

use super::lineedit::{self, LineInput};
use crate::backend::ssh;

/// Terminal parameters recorded from the client's `pty-req`.
#[derive(Debug, Clone)]
pub struct TermInfo {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for TermInfo {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Everything a session task needs besides its I/O stream.
pub struct SessionContext {
    pub username: String,
    pub registry: Arc<DeviceRegistry>,
    pub domain_suffix: String,
    pub term: TermInfo,
}

const PROMPT: &[u8] = b"bastion> ";

/// Run the interactive loop on an accepted `shell` channel.
pub async fn run_shell<R, W>(
    mut input: R,
    mut output: W,
    ctx: SessionContext,
    mut winch_rx: mpsc::Receiver<(u32, u32)>,
) -> GatewayResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_banner(&mut output, &ctx).await?;

    loop {
        output.write_all(PROMPT).await?;

        let command = match lineedit::read_line(&mut input, &mut output).await? {
            // ^C cancels the line, not the session.
            LineInput::Interrupted => continue,
            LineInput::Line(line) => line.trim().to_string(),
        };
        if command.is_empty() {
            continue;
        }

        info!(username = %ctx.username, %command, "interactive command");

        match command.as_str() {
            "exit" | "quit" => {
                output.write_all(b"Goodbye!\r\n").await?;
                return Ok(());
            }
            "list" | "ls" => {
                write_device_list(&mut output, &ctx).await?;
            }
            _ if command.starts_with("ssh ") || command == "ssh" => {
                handle_ssh_command(&mut input, &mut output, &mut winch_rx, &ctx, &command)
                    .await?;
                output.write_all(b"\r\n").await?;
            }
            other => {
                output
                    .write_all(format!("Unknown command: {other}\r\n").as_bytes())
                    .await?;
                output
                    .write_all(b"Use 'ssh <device-fqdn>' to connect or 'exit' to quit\r\n")
                    .await?;
            }
        }
    }
}

/// Run a one-shot `exec` request. Only the `ssh <fqdn>` command is
/// supported there; it behaves exactly like the interactive handoff.
pub async fn run_exec<R, W>(
    mut input: R,
    mut output: W,
    ctx: SessionContext,
    mut winch_rx: mpsc::Receiver<(u32, u32)>,
    command: String,
) -> GatewayResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let command = command.trim().to_string();
    info!(username = %ctx.username, %command, "exec command");

    if command.starts_with("ssh ") {
        handle_ssh_command(&mut input, &mut output, &mut winch_rx, &ctx, &command).await?;
    } else {
        output
            .write_all(format!("Unknown command: {command}\r\n").as_bytes())
            .await?;
        output
            .write_all(b"Use 'ssh <device-fqdn>' to connect\r\n")
            .await?;
    }
    Ok(())
}

async fn write_banner<W: AsyncWrite + Unpin>(
    output: &mut W,
    ctx: &SessionContext,
) -> std::io::Result<()> {
    output.write_all(b"\r\n").await?;
    output
        .write_all(b"Welcome to the device gateway bastion\r\n\r\n")
        .await?;
    write_device_list(output, ctx).await?;
    output.write_all(b"Commands:\r\n").await?;
    output
        .write_all(b"  ssh <device-fqdn>  - connect to a device\r\n")
        .await?;
    output
        .write_all(b"  list               - show available devices\r\n")
        .await?;
    output
        .write_all(b"  exit               - close the connection\r\n\r\n")
        .await?;
    Ok(())
}

async fn write_device_list<W: AsyncWrite + Unpin>(
    output: &mut W,
    ctx: &SessionContext,
) -> std::io::Result<()> {
    output.write_all(b"Available devices:\r\n").await?;
    for name in ctx.registry.device_names() {
        let line = match ctx.registry.get(name) {
            Some(entry) if !entry.description.is_empty() => {
                format!("  * {name}.{} ({})\r\n", ctx.domain_suffix, entry.description)
            }
            _ => format!("  * {name}.{}\r\n", ctx.domain_suffix),
        };
        output.write_all(line.as_bytes()).await?;
    }
    output.write_all(b"\r\n").await?;
    Ok(())
}

/// Parse and run `ssh <fqdn>`: prompt for credentials, then proxy the
/// session. Errors on the way are reported to the client and the
/// session returns to the interactive loop.
async fn handle_ssh_command<R, W>(
    input: &mut R,
    output: &mut W,
    winch_rx: &mut mpsc::Receiver<(u32, u32)>,
    ctx: &SessionContext,
    command: &str,
) -> GatewayResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut parts = command.split_whitespace();
    let _ssh = parts.next();
    let Some(fqdn) = parts.next() else {
        output
            .write_all(b"Error: Invalid command format. Use: ssh <device-fqdn>\r\n")
            .await?;
        return Ok(());
    };

    let (entry, device) = match ctx.registry.resolve(fqdn) {
        Ok(resolved) => resolved,
        Err(e) => {
            output
                .write_all(format!("Error: {e}\r\n").as_bytes())
                .await?;
            return Ok(());
        }
    };
    let entry = entry.clone();
    let device = device.to_string();

    output
        .write_all(format!("Connecting to {device} ({})...\r\n", entry.hostname).as_bytes())
        .await?;

    // Username prompt, defaulting to the bastion-authenticated user.
    output
        .write_all(format!("Username [{}]: ", ctx.username).as_bytes())
        .await?;
    let username = match lineedit::read_line(input, output).await? {
        LineInput::Interrupted => return Ok(()),
        LineInput::Line(line) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                ctx.username.clone()
            } else {
                trimmed
            }
        }
    };

    output.write_all(b"Password: ").await?;
    let secret = match lineedit::read_secret(input).await? {
        LineInput::Interrupted => {
            output.write_all(b"\r\n").await?;
            return Ok(());
        }
        LineInput::Line(secret) => secret,
    };
    output.write_all(b"\r\n").await?;

    info!(
        device = %device,
        username = %username,
        term = %ctx.term.term,
        cols = ctx.term.cols,
        rows = ctx.term.rows,
        "proxying to device"
    );

    proxy_to_device(input, output, winch_rx, &entry, &username, &secret, &ctx.term).await
}

/// Open an interactive shell on the device and relay bytes both ways
/// until the backend session ends.
async fn proxy_to_device<R, W>(
    input: &mut R,
    output: &mut W,
    winch_rx: &mut mpsc::Receiver<(u32, u32)>,
    entry: &DeviceEntry,
    username: &str,
    secret: &str,
    term: &TermInfo,
) -> GatewayResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = match ssh::connect(
        &entry.hostname,
        entry.ssh_port,
        username,
        secret,
        &entry.pinned_sha256,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            output
                .write_all(format!("\r\nError: Failed to connect to device: {e}\r\n").as_bytes())
                .await?;
            return Ok(());
        }
    };

    let mut channel = match ssh::open_shell(&session, &term.term, term.cols, term.rows).await {
        Ok(channel) => channel,
        Err(e) => {
            output
                .write_all(format!("\r\nError: Failed to start shell: {e}\r\n").as_bytes())
                .await?;
            return Ok(());
        }
    };

    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            read = input.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("client closed its stream during proxy");
                    break;
                }
                Ok(n) => {
                    if channel.data(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "client read error during proxy");
                    break;
                }
            },
            resize = winch_rx.recv() => match resize {
                Some((cols, rows)) => {
                    debug!(cols, rows, "forwarding window change to device");
                    let _ = channel.window_change(cols, rows, 0, 0).await;
                }
                // The connection handler is gone, so the client is too.
                None => break,
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    output.write_all(data).await?;
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    output.write_all(data).await?;
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "device session reported exit status");
                }
                Some(_) => {}
                None => {
                    debug!("device session ended");
                    break;
                }
            },
        }
    }

    let _ = session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await;

    output.write_all(b"\r\nConnection closed.\r\n").await?;
    Ok(())
}
