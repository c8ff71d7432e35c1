//! gNMI proxy service.
//!
//! Implements the inbound `gnmi.gNMI` surface and relays every RPC to
//! the backend device named by the request target. Unary RPCs are a
//! resolve → connect → call → return hop; Subscribe keeps two pumps
//! running, one per direction, until either side ends the stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use netgw_core::{DeviceRegistry, GnmiTarget};
use netgw_proto::gnmi::{
    subscribe_request, CapabilityRequest, CapabilityResponse, GetRequest, GetResponse, Path,
    SetRequest, SetResponse, SubscribeRequest, SubscribeResponse,
};
use netgw_proto::GNmi;

use crate::backend::gnmi as backend;

/// Metadata header naming the backend device, `fqdn[:user[:secret]]`.
pub const TARGET_HEADER: &str = "x-gnmi-target";

/// The inbound gNMI service.
pub struct GnmiProxy {
    registry: Arc<DeviceRegistry>,
    /// Secret used when the target string does not carry one.
    default_secret: String,
    /// Deadline applied to backend unary RPCs.
    rpc_timeout: Duration,
}

impl GnmiProxy {
    pub fn new(registry: Arc<DeviceRegistry>, default_secret: String, rpc_timeout: Duration) -> Self {
        Self {
            registry,
            default_secret,
            rpc_timeout,
        }
    }

    /// Extract the backend target, trying the metadata header first and
    /// the prefix `target` field second.
    fn target_from(
        &self,
        metadata: &MetadataMap,
        prefix: Option<&Path>,
    ) -> Result<GnmiTarget, Status> {
        if let Some(value) = metadata.get(TARGET_HEADER) {
            let raw = value
                .to_str()
                .map_err(|_| Status::invalid_argument("x-gnmi-target is not valid ascii"))?;
            return GnmiTarget::parse(raw, &self.default_secret).map_err(Status::from);
        }
        if let Some(prefix) = prefix {
            if !prefix.target.is_empty() {
                return GnmiTarget::parse(&prefix.target, &self.default_secret)
                    .map_err(Status::from);
            }
        }
        Err(Status::invalid_argument(
            "no target specified in metadata or prefix",
        ))
    }

    /// Resolve the target FQDN and open a backend client for it.
    async fn backend_for(&self, target: &GnmiTarget) -> Result<backend::BackendClient, Status> {
        let (entry, device) = self.registry.resolve(&target.fqdn).map_err(Status::from)?;
        debug!(
            device,
            hostname = %entry.hostname,
            port = entry.gnmi_port,
            "connecting to backend gnmi server"
        );
        backend::connect(&entry.hostname, entry.gnmi_port, &target.user, &target.secret)
            .await
            .map_err(|e| Status::unavailable(e.to_string()))
    }
}

#[tonic::async_trait]
impl GNmi for GnmiProxy {
    async fn capabilities(
        &self,
        request: Request<CapabilityRequest>,
    ) -> Result<Response<CapabilityResponse>, Status> {
        let (metadata, _, req) = request.into_parts();
        let target = self.target_from(&metadata, None)?;
        info!(target = %target.fqdn, "gnmi capabilities request");

        let mut client = self.backend_for(&target).await?;
        let resp = tokio::time::timeout(self.rpc_timeout, client.capabilities(req))
            .await
            .map_err(|_| Status::deadline_exceeded("backend capabilities request timed out"))??;
        Ok(Response::new(resp.into_inner()))
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let (metadata, _, req) = request.into_parts();
        let target = self.target_from(&metadata, req.prefix.as_ref())?;
        info!(target = %target.fqdn, paths = req.path.len(), "gnmi get request");

        let mut client = self.backend_for(&target).await?;
        let resp = tokio::time::timeout(self.rpc_timeout, client.get(req))
            .await
            .map_err(|_| Status::deadline_exceeded("backend get request timed out"))??;
        Ok(Response::new(resp.into_inner()))
    }

    async fn set(&self, request: Request<SetRequest>) -> Result<Response<SetResponse>, Status> {
        let (metadata, _, req) = request.into_parts();
        let target = self.target_from(&metadata, req.prefix.as_ref())?;
        info!(
            target = %target.fqdn,
            updates = req.update.len(),
            deletes = req.delete.len(),
            "gnmi set request"
        );

        let mut client = self.backend_for(&target).await?;
        let resp = tokio::time::timeout(self.rpc_timeout, client.set(req))
            .await
            .map_err(|_| Status::deadline_exceeded("backend set request timed out"))??;
        Ok(Response::new(resp.into_inner()))
    }

    type SubscribeStream = ReceiverStream<Result<SubscribeResponse, Status>>;

    async fn subscribe(
        &self,
        request: Request<Streaming<SubscribeRequest>>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let (metadata, _, mut inbound) = request.into_parts();

        // The first message carries the subscription descriptor and,
        // through its prefix, the target.
        let first = inbound
            .message()
            .await
            .map_err(|e| Status::invalid_argument(format!("failed to receive subscription request: {e}")))?
            .ok_or_else(|| Status::invalid_argument("failed to receive subscription request"))?;

        let prefix = match &first.request {
            Some(subscribe_request::Request::Subscribe(list)) => list.prefix.clone(),
            _ => None,
        };
        let target = self.target_from(&metadata, prefix.as_ref())?;
        info!(target = %target.fqdn, "gnmi subscribe request");

        let mut client = self.backend_for(&target).await?;

        let (to_backend_tx, to_backend_rx) = mpsc::channel::<SubscribeRequest>(32);
        to_backend_tx
            .send(first)
            .await
            .map_err(|_| Status::internal("backend request channel closed"))?;

        let backend_response = client
            .subscribe(Request::new(ReceiverStream::new(to_backend_rx)))
            .await
            .map_err(|e| Status::internal(format!("failed to create backend subscription: {e}")))?;
        let mut backend_stream = backend_response.into_inner();

        let (out_tx, out_rx) = mpsc::channel::<Result<SubscribeResponse, Status>>(32);
        // Both pumps report here; the first completion wins and tears
        // the other one down.
        let (done_tx, mut done_rx) = mpsc::channel::<Option<Status>>(2);

        // Client → backend: forward every request. End-of-stream from
        // the client half-closes the backend by dropping the sender and
        // does not end the RPC on its own.
        let done_inbound = done_tx.clone();
        let inbound_pump = tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(req)) => {
                        if to_backend_tx.send(req).await.is_err() {
                            let _ = done_inbound.try_send(None);
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!("subscribe client closed its stream");
                        drop(to_backend_tx);
                        return;
                    }
                    Err(status) => {
                        let _ = done_inbound.try_send(Some(status));
                        return;
                    }
                }
            }
        });

        // Backend → client: forward every response; backend end-of-stream
        // completes the RPC.
        let out_pump_tx = out_tx.clone();
        let backend_pump = tokio::spawn(async move {
            loop {
                match backend_stream.message().await {
                    Ok(Some(resp)) => {
                        if out_pump_tx.send(Ok(resp)).await.is_err() {
                            let _ = done_tx.try_send(None);
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!("backend subscribe stream ended");
                        let _ = done_tx.try_send(None);
                        return;
                    }
                    Err(status) => {
                        let _ = out_pump_tx.send(Err(status.clone())).await;
                        let _ = done_tx.try_send(Some(status));
                        return;
                    }
                }
            }
        });

        // Supervisor: the first pump to finish decides the outcome; the
        // other pump is torn down and the backend stream dropped with it.
        tokio::spawn(async move {
            let outcome = done_rx.recv().await.flatten();
            match &outcome {
                Some(status) => warn!(error = %status, "subscribe proxy ended with error"),
                None => info!("subscribe proxy completed"),
            }
            inbound_pump.abort();
            backend_pump.abort();
            drop(out_tx);
        });

        Ok(Response::new(ReceiverStream::new(out_rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgw_core::{ConfigFile, DeviceConfig};

    fn proxy() -> GnmiProxy {
        let mut cfg = ConfigFile::default();
        cfg.devices.insert(
            "srl1".to_string(),
            DeviceConfig {
                hostname: "127.0.0.1".to_string(),
                ssh_port: 0,
                telnet_port: 0,
                netconf_port: 0,
                gnmi_port: 0,
                description: String::new(),
                location: String::new(),
                pinned_sha256: Vec::new(),
            },
        );
        GnmiProxy::new(
            Arc::new(DeviceRegistry::from_config(&cfg)),
            "default-secret".to_string(),
            Duration::from_secs(30),
        )
    }

    fn metadata_with_target(value: &str) -> MetadataMap {
        let mut md = MetadataMap::new();
        md.insert(TARGET_HEADER, value.parse().unwrap());
        md
    }

    fn prefix_with_target(value: &str) -> Path {
        Path {
            target: value.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn metadata_target_wins_over_prefix() {
        let p = proxy();
        let md = metadata_with_target("srl1.example.net:oper:pw");
        let prefix = prefix_with_target("other.example.net");
        let target = p.target_from(&md, Some(&prefix)).unwrap();
        assert_eq!(target.fqdn, "srl1.example.net");
        assert_eq!(target.user, "oper");
        assert_eq!(target.secret, "pw");
    }

    #[test]
    fn prefix_target_is_used_without_metadata() {
        let p = proxy();
        let md = MetadataMap::new();
        let prefix = prefix_with_target("srl1.example.net");
        let target = p.target_from(&md, Some(&prefix)).unwrap();
        assert_eq!(target.fqdn, "srl1.example.net");
        assert_eq!(target.user, "admin");
        assert_eq!(target.secret, "default-secret");
    }

    #[test]
    fn empty_prefix_target_is_ignored() {
        let p = proxy();
        let md = MetadataMap::new();
        let prefix = prefix_with_target("");
        let status = p.target_from(&md, Some(&prefix)).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn missing_target_is_invalid_argument() {
        let p = proxy();
        let status = p.target_from(&MetadataMap::new(), None).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("no target"));
    }
}
