//! Realtime message server binary: wires the default JWT token service and
//! in-process broker into the core engine and serves it over a WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use realtime_auth::JwtTokenService;
use realtime_broker::InProcessBroker;
use realtime_core::config::AuthKeyConfig;
use realtime_core::{Server, ServerConfig};
use realtime_server::{build_router, AppState};
use tracing::info;

#[derive(Parser)]
#[command(name = "realtime-server")]
#[command(about = "Realtime message-oriented pub/sub server")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Accepted origins, e.g. "app.example:443,*:8080". Defaults to any.
    #[arg(long, default_value = "*:*", env = "REALTIME_ORIGINS")]
    origins: String,

    /// URL path the WebSocket is served on.
    #[arg(long, default_value = "/socketcluster/", env = "REALTIME_PATH")]
    path: String,

    /// Disallow clients from publishing directly (only server-side publish).
    #[arg(long)]
    disable_client_publish: bool,

    /// Additionally route `#authenticate` through the `emit` middleware stage.
    #[arg(long)]
    gate_authenticate: bool,

    /// Suppress warning events for rejected/silently-blocked middleware.
    #[arg(long)]
    quiet_middleware: bool,

    /// Symmetric signing key (HS256). Generated randomly if omitted and no
    /// asymmetric key pair is given.
    #[arg(long, env = "REALTIME_AUTH_KEY")]
    auth_key: Option<String>,

    /// RSA private key PEM path (RS256), paired with `--auth-public-key`.
    #[arg(long, env = "REALTIME_AUTH_PRIVATE_KEY_PATH")]
    auth_private_key_path: Option<std::path::PathBuf>,

    /// RSA public key PEM path (RS256), paired with `--auth-private-key`.
    #[arg(long, env = "REALTIME_AUTH_PUBLIC_KEY_PATH")]
    auth_public_key_path: Option<std::path::PathBuf>,

    /// Default token lifetime for server-minted tokens, in seconds.
    #[arg(long, default_value = "86400")]
    auth_default_expiry_secs: i64,

    #[arg(long, default_value = "10")]
    ack_timeout_secs: u64,

    #[arg(long, default_value = "8")]
    ping_interval_secs: u64,

    #[arg(long, default_value = "20")]
    ping_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = ServerConfig {
        allow_client_publish: !cli.disable_client_publish,
        ack_timeout: Duration::from_secs(cli.ack_timeout_secs),
        ping_interval: Duration::from_secs(cli.ping_interval_secs),
        ping_timeout: Duration::from_secs(cli.ping_timeout_secs),
        origins: cli.origins.clone(),
        path: cli.path.clone(),
        middleware_emit_warnings: !cli.quiet_middleware,
        gate_authenticate: cli.gate_authenticate,
        auth_default_expiry_secs: cli.auth_default_expiry_secs,
        ..ServerConfig::default()
    };

    let auth_key = cli.auth_key.map(|k| k.into_bytes());
    let private_key = cli
        .auth_private_key_path
        .map(std::fs::read)
        .transpose()?;
    let public_key = cli
        .auth_public_key_path
        .map(std::fs::read)
        .transpose()?;
    let key_config = AuthKeyConfig::from_parts(auth_key, private_key, public_key)?;
    let token_service = Arc::new(JwtTokenService::new(key_config, config.auth_default_expiry_secs)?);

    let broker = Arc::new(InProcessBroker::new());
    let server = Server::new(config.clone(), broker, token_service).await;

    info!(path = %config.path, origins = %config.origins, "realtime server starting");

    let app = build_router(AppState { server });
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!("listening on ws://{}{}", addr, config.path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
