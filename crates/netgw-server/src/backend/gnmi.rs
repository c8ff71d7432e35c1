//! gNMI backend client.
//!
//! Connects to a device's gNMI endpoint with the request credentials
//! carried as `username`/`password` call metadata. A TLS attempt comes
//! first; when that fails (lab devices frequently run plaintext gRPC)
//! the connection is retried once without transport security.

use tonic::metadata::MetadataValue;
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::debug;

use netgw_core::{GatewayError, GatewayResult};
use netgw_proto::GNmiClient;

use super::CONNECT_TIMEOUT;

/// Adds `username`/`password` metadata to every outgoing RPC.
#[derive(Clone)]
pub struct DeviceAuth {
    username: MetadataValue<tonic::metadata::Ascii>,
    password: MetadataValue<tonic::metadata::Ascii>,
}

impl DeviceAuth {
    fn new(username: &str, password: &str) -> GatewayResult<Self> {
        let username = MetadataValue::try_from(username).map_err(|_| {
            GatewayError::InvalidArgument("username is not valid metadata".to_string())
        })?;
        let password = MetadataValue::try_from(password).map_err(|_| {
            GatewayError::InvalidArgument("password is not valid metadata".to_string())
        })?;
        Ok(Self { username, password })
    }
}

impl Interceptor for DeviceAuth {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("username", self.username.clone());
        request
            .metadata_mut()
            .insert("password", self.password.clone());
        Ok(request)
    }
}

/// A connected backend gNMI client with per-call credentials attached.
pub type BackendClient = GNmiClient<InterceptedService<Channel, DeviceAuth>>;

/// Connect to a device's gNMI endpoint.
///
/// # Errors
///
/// `Unavailable` when both the TLS and the plaintext attempt fail.
pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    secret: &str,
) -> GatewayResult<BackendClient> {
    let auth = DeviceAuth::new(username, secret)?;

    let tls_attempt = async {
        Endpoint::from_shared(format!("https://{host}:{port}"))
            .map_err(|e| GatewayError::InvalidArgument(format!("bad gnmi endpoint: {e}")))?
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .map_err(|e| GatewayError::Internal(format!("tls config: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    };

    match tls_attempt.await {
        Ok(channel) => {
            debug!(%host, port, "connected to gnmi backend over tls");
            Ok(GNmiClient::with_interceptor(channel, auth))
        }
        Err(tls_err) => {
            debug!(%host, port, error = %tls_err, "tls connect failed, retrying plaintext");
            let channel = Endpoint::from_shared(format!("http://{host}:{port}"))
                .map_err(|e| GatewayError::InvalidArgument(format!("bad gnmi endpoint: {e}")))?
                .connect_timeout(CONNECT_TIMEOUT)
                .connect()
                .await
                .map_err(|e| {
                    GatewayError::Unavailable(format!("failed to connect to {host}:{port}: {e}"))
                })?;
            Ok(GNmiClient::with_interceptor(channel, auth))
        }
    }
}
