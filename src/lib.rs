use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_tungstenite::accept_async;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;

pub mod api;
pub mod auth;
pub mod broker;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod sanitize;
pub mod session;

use auth::{AuthModules, InternalAuthenticator};
use broker::Broker;
use config::Config;
use context::AppContext;
use credentials::CredentialStore;
use registry::AccountRegistry;
use session::SessionManager;

pub async fn run_api_server(ctx: AppContext, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| api::handle_request(req, ctx.clone()));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

pub async fn run_socket_server(ctx: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to accept socket: {}", e);
                continue;
            }
        };

        let ctx = ctx.clone();

        tokio::spawn(async move {
            if let Ok(ws_stream) = accept_async(socket).await {
                handlers::handle_socket(ws_stream, addr, ctx).await;
            }
        });
    }
}

pub async fn run() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Load provisioned accounts and credentials
    let registry = Arc::new(AccountRegistry::load(&config.config_dir)?);
    let credentials = Arc::new(CredentialStore::load(&config.config_dir)?);

    // Assemble the broker and its collaborators
    let broker = Broker::new(&config, registry.clone())?;
    let sessions = Arc::new(SessionManager::new(config.session_ttl_secs));

    let mut auth_modules = AuthModules::new();
    auth_modules.register(Arc::new(InternalAuthenticator::new(credentials)));
    let auth_modules = Arc::new(auth_modules);

    let ctx = AppContext::new(broker, sessions, registry, auth_modules, config.clone());

    // HTTP API listener
    let api_addr = format!("0.0.0.0:{}", config.port);
    let api_listener = TcpListener::bind(&api_addr).await?;
    tracing::info!("Telegraph API listening on http://{}", api_addr);

    // WebSocket listener
    let socket_addr = format!("0.0.0.0:{}", config.socket_port);
    let socket_listener = TcpListener::bind(&socket_addr).await?;
    tracing::info!("Telegraph socket listening on {} (WebSocket)", socket_addr);

    let api_server = run_api_server(ctx.clone(), api_listener);
    let socket_server = run_socket_server(ctx, socket_listener);

    tokio::select! {
        res = api_server => {
            if let Err(e) = res {
                tracing::error!("API server failed: {}", e);
            }
        },
        _ = socket_server => {
            tracing::info!("Socket server shut down.");
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    Ok(())
}
