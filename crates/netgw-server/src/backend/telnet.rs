//! Telnet backend adapter.
//!
//! A deliberately simple line-protocol exchange: one read and one write
//! per phase of the banner/username/password handshake, then the
//! command. Everything the device sends, prompts included, is kept in
//! the returned output to aid debugging. Devices with paged output may
//! be truncated; that is the adapter's documented contract.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

use netgw_core::{GatewayError, GatewayResult};

use super::{CommandOutcome, CONNECT_TIMEOUT};

/// Quiescence window between sending the command and the final read.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);

const READ_BUF_SIZE: usize = 4096;

/// Run one command over the line protocol and capture the full exchange.
pub async fn execute(
    host: &str,
    port: u16,
    username: &str,
    secret: &str,
    command: &str,
) -> CommandOutcome {
    let mut output = String::new();
    match run(&mut output, host, port, username, secret, command).await {
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
) -> GatewayResult<()> {
    // One deadline covers the whole exchange, like a socket deadline.
    let deadline = Instant::now() + CONNECT_TIMEOUT;

    debug!(%host, port, %username, "connecting to telnet backend");
    let mut conn = timeout_at(deadline, TcpStream::connect((host, port)))
        .await
        .map_err(|_| GatewayError::Timeout(format!("connecting to {host}:{port}")))?
        .map_err(|e| GatewayError::Unavailable(format!("failed to connect to telnet {host}:{port}: {e}")))?;

    let mut buf = vec![0u8; READ_BUF_SIZE];

    read_phase(&mut conn, &mut buf, output, deadline, "initial banner").await?;

    send_line(&mut conn, username, "username").await?;
    read_phase(&mut conn, &mut buf, output, deadline, "password prompt").await?;

    send_line(&mut conn, secret, "password").await?;
    read_phase(&mut conn, &mut buf, output, deadline, "login response").await?;

    debug!(%command, "executing telnet command");
    send_line(&mut conn, command, "command").await?;

    sleep(COMMAND_SETTLE).await;

    // Final read: a timeout here means the device went quiet, which is
    // the expected end of output rather than a failure.
    match timeout_at(deadline, conn.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => output.push_str(&String::from_utf8_lossy(&buf[..n])),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            return Err(GatewayError::Backend(format!(
                "failed to read command output: {e}"
            )));
        }
        Err(_) => {
            debug!("read timed out after command, treating as end of output");
        }
    }

    // Best-effort logout; the device closing first is fine.
    let _ = conn.write_all(b"exit\r\n").await;

    Ok(())
}

async fn send_line(conn: &mut TcpStream, line: &str, phase: &str) -> GatewayResult<()> {
    conn.write_all(format!("{line}\r\n").as_bytes())
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to send {phase}: {e}")))
}

async fn read_phase(
    conn: &mut TcpStream,
    buf: &mut [u8],
    output: &mut String,
    deadline: Instant,
    phase: &str,
) -> GatewayResult<()> {
    let n = timeout_at(deadline, conn.read(buf))
        .await
        .map_err(|_| GatewayError::Timeout(format!("reading {phase}")))?
        .map_err(|e| GatewayError::Backend(format!("failed to read {phase}: {e}")))?;
    if n == 0 {
        return Err(GatewayError::Backend(format!(
            "connection closed while reading {phase}"
        )));
    }
    output.push_str(&String::from_utf8_lossy(&buf[..n]));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Fake device speaking the line protocol for one connection.
    async fn fake_device(expect_exit: bool) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];

            sock.write_all(b"login: ").await.unwrap();
            let n = sock.read(&mut buf).await.unwrap();
            received.push(String::from_utf8_lossy(&buf[..n]).to_string());

            sock.write_all(b"Password: ").await.unwrap();
            let n = sock.read(&mut buf).await.unwrap();
            received.push(String::from_utf8_lossy(&buf[..n]).to_string());

            sock.write_all(b"device> ").await.unwrap();
            let n = sock.read(&mut buf).await.unwrap();
            received.push(String::from_utf8_lossy(&buf[..n]).to_string());

            sock.write_all(b"uptime is 4 weeks\r\ndevice> ").await.unwrap();

            if expect_exit {
                let n = sock.read(&mut buf).await.unwrap();
                received.push(String::from_utf8_lossy(&buf[..n]).to_string());
            }
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn full_exchange_is_captured() {
        let (addr, device) = fake_device(true).await;

        let outcome = execute(
            &addr.ip().to_string(),
            addr.port(),
            "admin",
            "secret",
            "show uptime",
        )
        .await;

        assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
        assert_eq!(outcome.exit_code(), 0);
        // Output keeps the prompts as well as the command result.
        assert!(outcome.output.contains("login: "));
        assert!(outcome.output.contains("Password: "));
        assert!(outcome.output.contains("uptime is 4 weeks"));

        let received = device.await.unwrap();
        assert_eq!(received[0], "admin\r\n");
        assert_eq!(received[1], "secret\r\n");
        assert_eq!(received[2], "show uptime\r\n");
        assert_eq!(received[3], "exit\r\n");
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = execute(&addr.ip().to_string(), addr.port(), "u", "p", "cmd").await;
        assert_eq!(outcome.exit_code(), 1);
        assert!(matches!(
            outcome.error,
            Some(GatewayError::Unavailable(_))
        ));
        assert!(outcome.output.is_empty());
    }

    #[tokio::test]
    async fn early_close_returns_partial_output() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"login: ").await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            // Drop without sending a password prompt.
        });

        let outcome = execute(&addr.ip().to_string(), addr.port(), "u", "p", "cmd").await;
        assert_eq!(outcome.exit_code(), 1);
        // The banner read before the failure is preserved.
        assert!(outcome.output.contains("login: "));
    }
}
