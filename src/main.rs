use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

mod api_clips;
mod api_streams;
mod api_visitor;
mod config;
mod errors;
mod events;
mod probe;
mod recency;
mod reconcile;
mod registry;
mod scanner;
mod stats;
mod watcher;

use config::Config;
use registry::StreamRegistry;
use scanner::{make_event_source, EventSource};

#[derive(Parser, Debug)]
#[command(
    name = "wildlife-stream-server",
    about = "Read-only backend for wildlife camera clip archives"
)]
struct Args {
    /// Path to the server configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub events: Arc<dyn EventSource>,
    pub http: reqwest::Client,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("wildlife_stream_server=debug,info")
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).unwrap_or_else(|_| {
        warn!("Could not load {}, using default configuration", args.config);
        Config::default()
    });

    info!(
        "Starting wildlife stream server on {}:{}",
        config.server.host, config.server.port
    );
    info!(
        "Stream registry '{}', event policy '{}'",
        config.streams.registry, config.streams.event_policy
    );

    let registry = Arc::new(StreamRegistry::new(
        &config.streams.registry,
        config.streams.cache,
    ));
    if config.streams.cache {
        watcher::start_registry_watcher(registry.clone()).await?;
    }

    let events = make_event_source(&config.streams.event_policy, config.streams.visit_duration);

    // Short timeout: geolocation is best-effort and must not stall requests
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()?;

    let state = AppState { registry, events, http };

    let cors_layer = if let Some(origin) = &config.server.cors_allow_origin {
        if origin == "*" {
            tower_http::cors::CorsLayer::permissive()
        } else {
            match origin.parse::<axum::http::HeaderValue>() {
                Ok(origin_header) => tower_http::cors::CorsLayer::new()
                    .allow_origin(origin_header)
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any),
                Err(_) => {
                    warn!("Invalid CORS origin '{}', falling back to permissive", origin);
                    tower_http::cors::CorsLayer::permissive()
                }
            }
        }
    } else {
        tower_http::cors::CorsLayer::permissive()
    };

    let mut app = build_router(state).layer(cors_layer);

    // Serve the built frontend when configured; the index.html fallback
    // keeps client-side routes working
    if let Some(static_dir) = &config.server.static_dir {
        if Path::new(static_dir).exists() {
            let index = Path::new(static_dir).join("index.html");
            app = app.fallback_service(ServeDir::new(static_dir).fallback(ServeFile::new(index)));
            info!("Serving frontend from {}", static_dir);
        } else {
            warn!("Static directory '{}' does not exist, frontend disabled", static_dir);
        }
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);

    if let Some(tls_config) = &config.server.tls {
        if tls_config.enabled {
            info!("Starting HTTPS server on {}", addr);
            start_https_server(app, &addr, tls_config).await?;
        } else {
            info!("Starting HTTP server on {}", addr);
            start_http_server(app, &addr).await?;
        }
    } else {
        info!("Starting HTTP server on {}", addr);
        start_http_server(app, &addr).await?;
    }

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/streams", get(api_streams::list_streams))
        .route("/api/streams/:stream_id", get(api_streams::stream_detail))
        .route("/api/streams/:stream_id/events", get(api_streams::stream_events))
        .route("/api/streams/:stream_id/stats", get(api_streams::stream_stats))
        .route(
            "/api/streams/:stream_id/dates-with-events",
            get(api_streams::dates_with_events),
        )
        .route(
            "/api/clips/:stream_id/:date/:filename",
            get(api_clips::serve_clip),
        )
        .route("/api/visitor/timezone", get(api_visitor::visitor_timezone))
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "app": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn start_http_server(app: Router, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn start_https_server(app: Router, addr: &str, tls_cfg: &config::TlsConfig) -> Result<()> {
    // Load TLS certificates
    let cert_file = File::open(&tls_cfg.cert_path).map_err(|e| {
        anyhow::anyhow!("Failed to open certificate file '{}': {}", tls_cfg.cert_path, e)
    })?;
    let key_file = File::open(&tls_cfg.key_path).map_err(|e| {
        anyhow::anyhow!("Failed to open private key file '{}': {}", tls_cfg.key_path, e)
    })?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);

    // Parse certificate and key
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {}", e))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

    if keys.is_empty() {
        // Try RSA private keys if PKCS8 fails
        let mut key_reader = BufReader::new(File::open(&tls_cfg.key_path)?);
        keys = rustls_pemfile::rsa_private_keys(&mut key_reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse RSA private key: {}", e))?;
    }

    let private_key = keys
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No private key found in key file"))?;

    let rustls_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, rustls::PrivateKey(private_key))
        .map_err(|e| anyhow::anyhow!("Failed to create TLS config: {}", e))?;

    info!("HTTPS server listening on https://{}", addr);
    info!("Certificate: {}", tls_cfg.cert_path);
    info!("Private key: {}", tls_cfg.key_path);

    let tls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(rustls_config));
    axum_server::bind_rustls(addr.parse()?, tls_config)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| anyhow::anyhow!("HTTPS server error: {}", e))?;

    Ok(())
}
