//! Wisp proxy server
//!
//! Shadowsocks 2022 over TCP and UDP with direct outbound.

mod config;
mod direct;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wisp_core::Service;
use wisp_transport::{AsyncUdpTransport, TcpEndpoint, Transport};

use config::Config;
use direct::DirectHandler;

/// Wisp - encrypted proxy server
#[derive(Parser)]
#[command(name = "wisp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve {
        /// Listen address, overriding the config file
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Print a fresh base64 pre-shared key
    Genkey,

    /// Validate and print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Genkey = cli.command {
        println!("{}", config::generate_psk()?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { listen } => {
            let mut config = config;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            config.validate()?;
            serve(&config).await?;
        }
        Commands::Config => {
            config.validate()?;
            let mut shown = config.clone();
            if !shown.server.psk.is_empty() {
                config.decode_psk()?;
                shown.server.psk = "<redacted>".to_string();
            }
            println!("{}", toml::to_string_pretty(&shown)?);
            println!("# configuration is valid");
        }
        Commands::Genkey => {}
    }

    Ok(())
}

/// Run TCP and UDP listeners until Ctrl-C.
async fn serve(config: &Config) -> anyhow::Result<()> {
    let addr = config.parse_listen_addr()?;
    let token = CancellationToken::new();
    let handler = Arc::new(DirectHandler::new(token.clone()));
    let service = Arc::new(
        Service::new(config.service_config()?, handler).context("failed to start service")?,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind TCP {addr}"))?;
    let udp: Arc<dyn Transport> = Arc::new(
        AsyncUdpTransport::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP {addr}"))?,
    );
    info!(
        listen = %addr,
        method = service.method().name(),
        "wisp {} listening",
        env!("CARGO_PKG_VERSION")
    );

    let janitor = service.spawn_janitor(token.clone());
    let tcp = tokio::spawn(accept_loop(listener, service.clone(), token.clone()));
    let packets = {
        let service = service.clone();
        let udp = udp.clone();
        let token = token.clone();
        tokio::spawn(async move { service.serve_packets(udp, &token).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    token.cancel();
    udp.close();

    let _ = tcp.await;
    if let Ok(Err(e)) = packets.await {
        warn!(error = %e, "UDP listener failed");
    }
    let _ = janitor.await;
    Ok(())
}

async fn accept_loop(listener: TcpListener, service: Arc<Service>, token: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let service = service.clone();
        tokio::spawn(async move {
            handle_stream(&service, stream, peer).await;
        });
    }
}

async fn handle_stream(service: &Service, stream: tokio::net::TcpStream, peer: SocketAddr) {
    let endpoint = match TcpEndpoint::new(stream) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            debug!(peer = %peer, error = %e, "socket setup failed");
            return;
        }
    };

    if let Err(e) = service.new_connection(endpoint.into_parts(), peer).await {
        if e.is_rejection() {
            warn!(peer = %peer, error = %e, "handshake rejected");
        } else {
            debug!(peer = %peer, error = %e, "connection ended");
        }
    }
}
