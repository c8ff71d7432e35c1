//! netgw-server: multi-protocol access gateway for managed network
//! devices.
//!
//! One process, three listeners: the command gRPC service, the gNMI
//! proxy, and the SSH bastion. Every inbound session is resolved to a
//! backend device through the shared read-only registry.

mod backend;
mod bastion;
mod command;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tonic::transport::Server;
use tracing::{error, info};

use netgw_core::{ConfigFile, DeviceRegistry};
use netgw_proto::{GNmiServer, GatewayServer};

use bastion::Bastion;
use command::CommandService;
use telemetry::GnmiProxy;

/// netgw-server: device fleet access gateway
#[derive(Parser, Debug)]
#[command(name = "netgw-server", version, about = "Device fleet access gateway")]
struct Cli {
    /// Device configuration file
    #[arg(long, default_value = "config/devices.toml")]
    config: PathBuf,

    /// Command service (gRPC) port
    #[arg(long, default_value_t = 50051)]
    grpc_port: u16,

    /// gNMI proxy port
    #[arg(long, default_value_t = 57400)]
    gnmi_port: u16,

    /// SSH bastion port
    #[arg(long, default_value_t = 2222)]
    ssh_port: u16,

    /// Address to bind all listeners on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// SSH host key file (must exist; no key is generated)
    #[arg(long, default_value = "config/ssh_host_key")]
    host_key: PathBuf,

    /// Authorized client keys for the bastion
    #[arg(long, default_value = "config/authorized_keys")]
    authorized_keys: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigFile::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // CLI wins over the config file; RUST_LOG wins over both.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_tracing(&level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        devices = config.devices.len(),
        "starting netgw gateway"
    );

    if let Err(e) = run(cli, config).await {
        error!(error = %e, "gateway failed");
        std::process::exit(1);
    }

    info!("gateway stopped");
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, config: ConfigFile) -> anyhow::Result<()> {
    let registry = Arc::new(DeviceRegistry::from_config(&config));
    let settings = config.settings.clone();
    let rpc_timeout = Duration::from_secs(settings.default_timeout);

    // Command gRPC service.
    let grpc_addr = format!("{}:{}", cli.bind, cli.grpc_port)
        .parse()
        .context("invalid command service address")?;
    let command_service = CommandService::new(registry.clone());
    let grpc_server = tokio::spawn(async move {
        info!(addr = %grpc_addr, "command service listening");
        Server::builder()
            .add_service(GatewayServer::new(command_service))
            .serve(grpc_addr)
            .await
    });

    // gNMI proxy.
    let gnmi_addr = format!("{}:{}", cli.bind, cli.gnmi_port)
        .parse()
        .context("invalid gnmi proxy address")?;
    let gnmi_proxy = GnmiProxy::new(
        registry.clone(),
        settings.gnmi_default_secret.clone(),
        rpc_timeout,
    );
    let gnmi_server = tokio::spawn(async move {
        info!(addr = %gnmi_addr, "gnmi proxy listening");
        Server::builder()
            .add_service(GNmiServer::new(gnmi_proxy))
            .serve(gnmi_addr)
            .await
    });

    // SSH bastion.
    let bastion = Bastion::new(
        registry.clone(),
        &settings,
        &cli.host_key,
        &cli.authorized_keys,
    )
    .context("failed to create ssh bastion")?;
    let bastion_bind = cli.bind.clone();
    let bastion_port = cli.ssh_port;
    let bastion_server =
        tokio::spawn(async move { bastion.run(&bastion_bind, bastion_port).await });

    info!("gateway started");

    tokio::select! {
        result = grpc_server => result.context("command service task failed")?
            .context("command service error")?,
        result = gnmi_server => result.context("gnmi proxy task failed")?
            .context("gnmi proxy error")?,
        result = bastion_server => result.context("bastion task failed")?
            .context("ssh bastion error")?,
        _ = shutdown_signal() => {
            info!("received shutdown signal, exiting");
        }
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT (ctrl-c).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
