//! Command execution service.
//!
//! Validates inbound requests, resolves the target device through the
//! registry, and hands the command to the backend adapter selected by
//! the protocol tag. Adapter failures are not RPC errors: the response
//! carries the partial output, the error text and exit code 1.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, warn};

use netgw_core::DeviceRegistry;
use netgw_proto::{CommandRequest, CommandResponse, Gateway};

use crate::backend::{self, BackendProtocol, CommandOutcome};

/// The `gateway.v1.Gateway` service implementation.
pub struct CommandService {
    registry: Arc<DeviceRegistry>,
}

impl CommandService {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Field validation, in request-field order. The first missing
    /// field wins.
    fn validate(req: &CommandRequest) -> Result<(), Status> {
        if req.fqdn.is_empty() {
            return Err(Status::invalid_argument("FQDN is required"));
        }
        if req.username.is_empty() {
            return Err(Status::invalid_argument("username is required"));
        }
        if req.password.is_empty() {
            return Err(Status::invalid_argument("password is required"));
        }
        if req.command.is_empty() {
            return Err(Status::invalid_argument("command is required"));
        }
        Ok(())
    }
}

fn response_from(outcome: CommandOutcome, session_id: String) -> CommandResponse {
    let exit_code = outcome.exit_code();
    CommandResponse {
        output: outcome.output,
        error: outcome
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        exit_code,
        session_id,
    }
}

#[tonic::async_trait]
impl Gateway for CommandService {
    async fn execute_command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<CommandResponse>, Status> {
        let req = request.into_inner();
        info!(
            fqdn = %req.fqdn,
            username = %req.username,
            protocol = %req.protocol,
            command = %req.command,
            "received command execution request"
        );

        Self::validate(&req)?;

        let (entry, device) = self.registry.resolve(&req.fqdn).map_err(|e| {
            warn!(fqdn = %req.fqdn, error = %e, "failed to resolve device");
            Status::from(e)
        })?;

        let protocol = BackendProtocol::parse(&req.protocol).ok_or_else(|| {
            Status::invalid_argument(format!("unsupported protocol: {}", req.protocol))
        })?;

        info!(device, hostname = %entry.hostname, protocol = protocol.as_str(), "routing to device");

        let outcome =
            backend::execute(protocol, entry, &req.username, &req.password, &req.command).await;

        match &outcome.error {
            Some(e) => error!(device, error = %e, "command execution failed"),
            None => info!(device, "command executed successfully"),
        }

        Ok(Response::new(response_from(outcome, req.session_id)))
    }

    type StreamCommandStream = ReceiverStream<Result<CommandResponse, Status>>;

    async fn stream_command(
        &self,
        request: Request<Streaming<CommandRequest>>,
    ) -> Result<Response<Self::StreamCommandStream>, Status> {
        info!("starting stream command session");

        let registry = self.registry.clone();
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            // Connection details are bound by the first message and kept
            // for the rest of the stream.
            let mut bound: Option<(String, BackendProtocol, String, String)> = None;

            loop {
                let req = match inbound.message().await {
                    Ok(Some(req)) => req,
                    Ok(None) => {
                        info!("stream closed by client");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "error receiving stream request");
                        return;
                    }
                };

                if bound.is_none() {
                    let (protocol, device) = match init_stream(&registry, &req) {
                        Ok(init) => init,
                        Err(status) => {
                            let _ = tx.send(Err(status)).await;
                            return;
                        }
                    };
                    info!(
                        device = %device,
                        username = %req.username,
                        protocol = protocol.as_str(),
                        "stream session initialized"
                    );
                    bound = Some((device, protocol, req.username.clone(), req.password.clone()));
                }

                let Some((device, protocol, username, password)) = bound.as_ref() else {
                    continue;
                };

                // Entries are immutable, so looking the device up again
                // per command is just a map read.
                let outcome = match registry.get(device) {
                    Some(entry) => {
                        backend::execute(*protocol, entry, username, password, &req.command).await
                    }
                    None => return,
                };

                if tx
                    .send(Ok(response_from(outcome, req.session_id)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Resolve and validate the stream-binding first message.
fn init_stream(
    registry: &DeviceRegistry,
    req: &CommandRequest,
) -> Result<(BackendProtocol, String), Status> {
    let (_, device) = registry.resolve(&req.fqdn).map_err(Status::from)?;
    let protocol = BackendProtocol::parse(&req.protocol).ok_or_else(|| {
        Status::invalid_argument(format!("unsupported protocol: {}", req.protocol))
    })?;
    Ok((protocol, device.to_string()))
}
