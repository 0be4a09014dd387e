#![cfg_attr(not(test), deny(clippy::panic))]

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use mpn_relay_server::config::{ServerConfig, DEFAULT_BASE_PORT};
use mpn_relay_server::server::GameServer;
use mpn_relay_server::{broadcast, logging, websocket};

/// MPN relay -- netplay lobby and input-relay server for emulator multiplayer
#[derive(Parser, Debug)]
#[command(name = "mpn-relay-server")]
#[command(about = "Netplay lobby and realtime input-relay server")]
#[command(version)]
struct Cli {
    /// Public server name, echoed in LAN discovery replies.
    #[arg(long, default_value = "")]
    name: String,

    /// Lobby port; rooms use the contiguous range above it.
    #[arg(long, default_value_t = DEFAULT_BASE_PORT)]
    baseport: u16,

    /// Do not answer LAN discovery probes.
    #[arg(long)]
    disable_broadcast: bool,

    /// Directory to mirror logs into.
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Message of the day returned by request_motd.
    #[arg(long, default_value = "MPN Beta")]
    motd: String,

    /// Maximum concurrent rooms.
    #[arg(long, default_value_t = 10)]
    max_games: u16,

    /// Require the shared-secret auth digest on create_room and get_rooms.
    #[arg(long)]
    enable_auth: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.name.is_empty() {
        eprintln!("--name is required");
        std::process::exit(1);
    }

    logging::init(cli.log_path.as_deref());

    let config = ServerConfig {
        server_name: cli.name,
        base_port: cli.baseport,
        max_games: cli.max_games,
        motd: cli.motd,
        enable_auth: cli.enable_auth,
        disable_broadcast: cli.disable_broadcast,
        log_path: cli.log_path,
    };

    let server = GameServer::new(config.clone());

    tokio::spawn(server.clone().purge_task());
    tokio::spawn(server.clone().stats_task());

    if !config.disable_broadcast {
        let name = config.server_name.clone();
        let base_port = config.base_port;
        tokio::spawn(async move {
            if let Err(err) = broadcast::run(name, base_port).await {
                tracing::error!(error = %err, "LAN discovery responder stopped");
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.base_port));
    let app = websocket::create_router().with_state(server);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        %addr,
        server_name = %config.server_name,
        max_games = config.max_games,
        auth = config.enable_auth,
        "lobby listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
