//! SSH bastion server.
//!
//! The single shell entry point into the fleet: clients authenticate
//! once with a public key, get an interactive device picker, and are
//! proxied onwards to the device they name. The host identity must
//! exist on disk before startup; there is no key generation here.

mod lineedit;
mod session;

pub use session::{SessionContext, TermInfo};

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::{load_secret_key, HashAlg, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use netgw_core::{DeviceRegistry, GatewayError, GatewayResult, Settings};

/// The set of client public keys allowed to authenticate.
///
/// An empty set accepts every key. That mode exists for development
/// only and is logged loudly as such.
#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    fingerprints: HashSet<String>,
}

impl AuthorizedKeys {
    /// Load the authorized-keys file. A missing file behaves like an
    /// empty one: every key is accepted.
    pub fn load(path: &Path) -> GatewayResult<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "authorized keys file not found, all client keys will be accepted (INSECURE)"
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let keys = Self::parse(&content);
        info!(count = keys.fingerprints.len(), "loaded authorized keys");
        Ok(keys)
    }

    /// Parse authorized-keys lines. Blank lines and `#` comments are
    /// skipped silently, unparsable lines with a warning.
    pub fn parse(content: &str) -> Self {
        let mut fingerprints = HashSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match PublicKey::from_openssh(line) {
                Ok(key) => {
                    fingerprints.insert(key.fingerprint(HashAlg::Sha256).to_string());
                }
                Err(e) => {
                    warn!(error = %e, %line, "failed to parse authorized key, skipping");
                }
            }
        }
        Self { fingerprints }
    }

    /// True when no keys are configured and every client is accepted.
    pub fn accept_any(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn permits(&self, key: &PublicKey) -> bool {
        self.accept_any()
            || self
                .fingerprints
                .contains(&key.fingerprint(HashAlg::Sha256).to_string())
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Load the bastion host key, failing fast when the file is absent.
fn load_host_key(path: &Path) -> GatewayResult<PrivateKey> {
    if !path.exists() {
        return Err(GatewayError::Internal(format!(
            "host key file not found: {} (generate with: ssh-keygen -t ed25519 -f {})",
            path.display(),
            path.display()
        )));
    }
    load_secret_key(path, None)
        .map_err(|e| GatewayError::Internal(format!("failed to load host key: {e}")))
}

/// State shared by every connection.
#[derive(Debug)]
struct Shared {
    registry: Arc<DeviceRegistry>,
    domain_suffix: String,
    authorized: AuthorizedKeys,
}

/// The bastion server: accepts SSH connections and spawns one handler
/// per client.
#[derive(Debug)]
pub struct Bastion {
    shared: Arc<Shared>,
    host_key: PrivateKey,
}

impl Bastion {
    /// Build the bastion, loading the host identity and the
    /// authorized-keys table from disk.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        settings: &Settings,
        host_key_path: &Path,
        authorized_keys_path: &Path,
    ) -> GatewayResult<Self> {
        let host_key = load_host_key(host_key_path)?;
        let authorized = AuthorizedKeys::load(authorized_keys_path)?;
        if authorized.accept_any() {
            warn!("no authorized keys configured, accepting all connections (INSECURE)");
        }
        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                domain_suffix: settings.domain_suffix.clone(),
                authorized,
            }),
            host_key,
        })
    }

    /// Run the accept loop forever.
    pub async fn run(mut self, bind: &str, port: u16) -> GatewayResult<()> {
        let config = Arc::new(server::Config {
            methods: MethodSet::from(&[MethodKind::PublicKey][..]),
            keys: vec![self.host_key.clone()],
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        info!(%bind, port, "ssh bastion listening");
        server::Server::run_on_address(&mut self, config, (bind, port))
            .await
            .map_err(|e| GatewayError::Internal(format!("ssh bastion server failed: {e}")))
    }
}

impl server::Server for Bastion {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> ConnectionHandler {
        info!(peer = ?peer, "new bastion connection");
        ConnectionHandler {
            shared: self.shared.clone(),
            peer,
            username: None,
            term: None,
            channels: HashMap::new(),
            winch: HashMap::new(),
        }
    }
}

/// Per-connection handler: authentication state, recorded terminal
/// parameters, and the open session channels.
pub struct ConnectionHandler {
    shared: Arc<Shared>,
    peer: Option<SocketAddr>,
    username: Option<String>,
    term: Option<TermInfo>,
    channels: HashMap<ChannelId, Channel<Msg>>,
    winch: HashMap<ChannelId, mpsc::Sender<(u32, u32)>>,
}

impl ConnectionHandler {
    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            username: self.username.clone().unwrap_or_default(),
            registry: self.shared.registry.clone(),
            domain_suffix: self.shared.domain_suffix.clone(),
            term: self.term.clone().unwrap_or_default(),
        }
    }
}

impl server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        debug!(user, peer = ?self.peer, "public key authentication attempt");
        if self.shared.authorized.permits(public_key) {
            Ok(Auth::Accept)
        } else {
            warn!(user, peer = ?self.peer, "rejected offered public key");
            Ok(Self::reject())
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if !self.shared.authorized.permits(public_key) {
            warn!(user, peer = ?self.peer, "rejected public key");
            return Ok(Self::reject());
        }
        if self.shared.authorized.accept_any() {
            warn!(user, "accepting connection without key check (INSECURE)");
        } else {
            info!(user, "accepted public key");
        }
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(channel = ?channel.id(), "session channel opened");
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Clients that open a PTY without sizing it get a sane default.
        let cols = if col_width == 0 { 120 } else { col_width };
        let rows = if row_height == 0 { 30 } else { row_height };
        info!(term, cols, rows, "pty request");
        self.term = Some(TermInfo {
            term: term.to_string(),
            cols,
            rows,
        });
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(channel) = self.channels.remove(&channel_id) else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };
        session.channel_success(channel_id)?;

        let (winch_tx, winch_rx) = mpsc::channel(4);
        self.winch.insert(channel_id, winch_tx);

        let ctx = self.context();
        let handle = session.handle();
        tokio::spawn(async move {
            let stream = channel.into_stream();
            let (mut input, mut output) = tokio::io::split(stream);
            if let Err(e) = session::run_shell(&mut input, &mut output, ctx, winch_rx).await {
                debug!(error = %e, "interactive session ended with error");
            }
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        info!(username = ?self.username, %command, "exec request");

        let Some(channel) = self.channels.remove(&channel_id) else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };
        session.channel_success(channel_id)?;

        let (winch_tx, winch_rx) = mpsc::channel(4);
        self.winch.insert(channel_id, winch_tx);

        let ctx = self.context();
        let handle = session.handle();
        tokio::spawn(async move {
            let stream = channel.into_stream();
            let (mut input, mut output) = tokio::io::split(stream);
            if let Err(e) =
                session::run_exec(&mut input, &mut output, ctx, winch_rx, command).await
            {
                debug!(error = %e, "exec session ended with error");
            }
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = ?channel, cols = col_width, rows = row_height, "window change");
        if let Some(tx) = self.winch.get(&channel) {
            let _ = tx.try_send((col_width, row_height));
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = ?channel, "channel eof");
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = ?channel, "channel closed");
        self.channels.remove(&channel);
        self.winch.remove(&channel);
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        info!(
            target = %host_to_connect,
            port = port_to_connect,
            originator = %originator_address,
            originator_port,
            "direct tcp/ip forward request"
        );

        let target = format!("{host_to_connect}:{port_to_connect}");
        tokio::spawn(async move {
            match TcpStream::connect(&target).await {
                Ok(mut stream) => {
                    let mut channel_stream = channel.into_stream();
                    let _ =
                        tokio::io::copy_bidirectional(&mut channel_stream, &mut stream).await;
                    debug!(%target, "direct tcp/ip forward ended");
                }
                Err(e) => {
                    warn!(%target, error = %e, "failed to connect to forward target");
                }
            }
        });
        Ok(true)
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        info!(peer = ?self.peer, user = ?self.username, "bastion connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgw_core::ConfigFile;

    // A throwaway ed25519 key pair generated for these tests only.
    const TEST_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIK86ys4yE7Cq/Bd7DjdYmfCBDQE75x6YFzYusAl6ofVv test@netgw";
    const OTHER_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIH6zgvtW2dNg14zL7hhivWhWhN6y7dahGb45KhlA6rbE other@netgw";

    #[test]
    fn parse_skips_blanks_comments_and_garbage() {
        let content = format!(
            "# bastion clients\n\n{TEST_KEY}\nnot-a-key at all\n{OTHER_KEY}\n"
        );
        let keys = AuthorizedKeys::parse(&content);
        assert_eq!(keys.len(), 2);
        assert!(!keys.accept_any());
    }

    #[test]
    fn permits_only_listed_keys() {
        let keys = AuthorizedKeys::parse(TEST_KEY);
        let listed = PublicKey::from_openssh(TEST_KEY).unwrap();
        let unlisted = PublicKey::from_openssh(OTHER_KEY).unwrap();
        assert!(keys.permits(&listed));
        assert!(!keys.permits(&unlisted));
    }

    #[test]
    fn empty_table_accepts_any_key() {
        let keys = AuthorizedKeys::parse("# nothing here\n");
        assert!(keys.accept_any());
        let key = PublicKey::from_openssh(TEST_KEY).unwrap();
        assert!(keys.permits(&key));
    }

    #[test]
    fn missing_authorized_keys_file_accepts_any() {
        let dir = tempfile::tempdir().unwrap();
        let keys = AuthorizedKeys::load(&dir.path().join("does-not-exist")).unwrap();
        assert!(keys.accept_any());
    }

    #[test]
    fn missing_host_key_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DeviceRegistry::from_config(&ConfigFile::default()));
        let settings = Settings::default();
        let result = Bastion::new(
            registry,
            &settings,
            &dir.path().join("ssh_host_key"),
            &dir.path().join("authorized_keys"),
        );
        match result {
            Err(GatewayError::Internal(msg)) => {
                assert!(msg.contains("host key file not found"));
                assert!(msg.contains("ssh-keygen"));
            }
            other => panic!("expected fail-fast host key error, got {other:?}"),
        }
    }
}
