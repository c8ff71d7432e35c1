//! NETCONF backend adapter.
//!
//! Speaks end-of-message framed NETCONF 1.0 over the SSH `netconf`
//! subsystem: hello, one RPC, close-session, each terminated by the
//! `]]>]]>` delimiter. The settle windows between sends are coarse
//! quiescence timers sized for the targeted devices; the ordering
//! guarantee (hello before RPC before close) is the contract.

use std::time::Duration;

use russh::{ChannelMsg, Disconnect};
use tokio::time::sleep;
use tracing::debug;

use netgw_core::{GatewayError, GatewayResult};

use super::ssh;
use super::CommandOutcome;

/// NETCONF 1.0 end-of-message delimiter.
pub const MESSAGE_DELIMITER: &str = "]]>]]>";

const SUBSYSTEM: &str = "netconf";

/// Wait for the server hello before sending ours.
const SESSION_SETTLE: Duration = Duration::from_millis(100);
/// Wait between our hello and the RPC.
const HELLO_SETTLE: Duration = Duration::from_millis(200);
/// Wait between the RPC and close-session.
const RPC_SETTLE: Duration = Duration::from_millis(500);

/// The client hello, declaring only the base 1.0 capability.
pub fn hello() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
  </capabilities>
</hello>{MESSAGE_DELIMITER}"#
    )
}

/// Frame an RPC body for the wire.
///
/// A body that already contains an `<rpc` element is forwarded as
/// given; anything else is wrapped in a base-1.0 `<rpc>` envelope with
/// message-id 1. The delimiter is appended either way.
pub fn frame_rpc(body: &str) -> String {
    if body.contains("<rpc") {
        body.to_string()
    } else {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
{body}
</rpc>{MESSAGE_DELIMITER}"#
        )
    }
}

/// The close-session RPC sent at the end of every exchange.
pub fn close_session() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc message-id="2" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <close-session/>
</rpc>{MESSAGE_DELIMITER}"#
    )
}

/// Run one NETCONF RPC on a device and capture everything it sent,
/// server hello and rpc-reply included.
pub async fn execute(
    host: &str,
    port: u16,
    username: &str,
    secret: &str,
    rpc_body: &str,
    pinned_sha256: &[String],
) -> CommandOutcome {
    let mut output = String::new();
    match run(&mut output, host, port, username, secret, rpc_body, pinned_sha256).await {
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
    rpc_body: &str,
    pinned_sha256: &[String],
) -> GatewayResult<()> {
    let session = ssh::connect(host, port, username, secret, pinned_sha256).await?;

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| GatewayError::Unavailable(format!("failed to open session channel: {e}")))?;
    channel
        .request_subsystem(true, SUBSYSTEM)
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to request netconf subsystem: {e}")))?;

    // Give the server a moment to emit its hello.
    sleep(SESSION_SETTLE).await;

    channel
        .data(hello().as_bytes())
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to send hello: {e}")))?;

    sleep(HELLO_SETTLE).await;

    debug!(%host, "sending netconf rpc");
    channel
        .data(frame_rpc(rpc_body).as_bytes())
        .await
        .map_err(|e| GatewayError::Backend(format!("failed to send rpc: {e}")))?;

    sleep(RPC_SETTLE).await;

    // Best-effort teardown: still try to close the session cleanly even
    // if an earlier phase already went sideways on the wire.
    let _ = channel.data(close_session().as_bytes()).await;
    let _ = channel.eof().await;

    // Drain everything the server produced until it ends the session.
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => {
                output.push_str(&String::from_utf8_lossy(data));
            }
            ChannelMsg::ExtendedData { ref data, .. } => {
                output.push_str(&String::from_utf8_lossy(data));
            }
            _ => {}
        }
    }

    let _ = session
        .disconnect(Disconnect::ByApplication, "", "en")
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_declares_base_capability() {
        let h = hello();
        assert!(h.contains("urn:ietf:params:netconf:base:1.0"));
        assert!(h.ends_with(MESSAGE_DELIMITER));
    }

    #[test]
    fn plain_body_is_wrapped() {
        let framed = frame_rpc("<get-config><source><running/></source></get-config>");
        assert!(framed.contains(r#"<rpc message-id="1""#));
        assert!(framed.contains("<get-config>"));
        assert!(framed.ends_with(MESSAGE_DELIMITER));
    }

    #[test]
    fn preframed_rpc_is_forwarded_verbatim() {
        let body = format!(
            r#"<rpc message-id="42"><get/></rpc>{MESSAGE_DELIMITER}"#
        );
        assert_eq!(frame_rpc(&body), body);
    }

    #[test]
    fn close_session_uses_message_id_two() {
        let c = close_session();
        assert!(c.contains(r#"message-id="2""#));
        assert!(c.contains("<close-session/>"));
        assert!(c.ends_with(MESSAGE_DELIMITER));
    }
}
