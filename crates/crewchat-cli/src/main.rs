//! Crewer chat terminal client.
//!
//! # Usage
//!
//! ```bash
//! # List the rooms the signed-in user belongs to
//! crewchat --server https://api.crewer.example --token "$JWT" rooms
//!
//! # Open a room; type to send, `/retry <n>` to resend, `/quit` to leave
//! CREWCHAT_TOKEN="$JWT" crewchat join 42
//! ```

use std::{
    io::{self, Write},
    time::Duration,
};

use clap::{Parser, Subcommand};
use crewchat_app::Runtime;
use crewchat_cli::{Endpoints, TerminalDriver};
use crewchat_client::{AuthContext, RoomId, http::ApiClient, system_env::SystemEnv};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Crewer chat client
#[derive(Parser, Debug)]
#[command(name = "crewchat")]
#[command(about = "Terminal client for Crewer chat rooms")]
#[command(version)]
struct Args {
    /// REST base URL of the backend
    #[arg(short, long, env = "CREWCHAT_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// STOMP WebSocket URL (default: derived from --server)
    #[arg(long, env = "CREWCHAT_SOCKET")]
    socket: Option<String>,

    /// Access token (JWT)
    #[arg(short, long, env = "CREWCHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List group and direct rooms
    Rooms,

    /// Open a room and chat
    Join {
        /// Room id
        room: String,

        /// Seconds a message may wait for its echo
        #[arg(long, default_value_t = 10)]
        send_timeout: u64,

        /// Give up after this many failed reconnect attempts
        #[arg(long)]
        max_reconnects: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout carries the conversation
    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let endpoints = Endpoints::new(&args.server, args.socket);
    let auth = args.token.map_or_else(AuthContext::anonymous, AuthContext::new);
    let api = ApiClient::new(endpoints.api_base.clone(), auth.clone());

    match args.command {
        Command::Rooms => list_rooms(&api).await,
        Command::Join { room, send_timeout, max_reconnects } => {
            let config = endpoints.client_config(Duration::from_secs(send_timeout), max_reconnects);
            let driver = TerminalDriver::new(api);
            let mut runtime = Runtime::new(driver, SystemEnv::new(), config, auth);

            tracing::info!(room = %room, socket = %endpoints.socket_url, "joining");
            runtime.open(RoomId::new(room)).await?;
            runtime.run().await?;
            runtime.close().await?;
            Ok(())
        },
    }
}

async fn list_rooms(api: &ApiClient) -> Result<(), Box<dyn std::error::Error>> {
    let rooms = api.list_rooms().await?;
    let mut out = io::stdout().lock();

    for room in &rooms {
        let last = room.last_content.as_deref().unwrap_or("");
        writeln!(
            out,
            "{}\t{:?}\t{}\t{}/{}\t{last}",
            room.id,
            room.kind,
            room.display_name(),
            room.current_participants,
            room.max_participants,
        )?;
    }
    Ok(())
}
