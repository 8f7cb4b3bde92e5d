//! s3gate Server - file-style HTTP gateway in front of S3 buckets.
//!
//! Serves GET/HEAD/PUT/DELETE on configured mount paths, translating each
//! request into object store operations, and reloads its targets on `SIGHUP`.
//!
//! # Usage
//!
//! ```text
//! s3gate-server --config /etc/s3gate/config.yaml
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `S3GATE_CONFIG` | `config.yaml` | Configuration file (`--config` wins) |
//! | `GATEWAY_LISTEN` | `0.0.0.0:8080` | Bind address |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `LOG_FORMAT` | `text` | `text` or `json` |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use s3gate_core::config::ServerConfig;
use s3gate_core::metrics::{Metrics, PrometheusMetrics};
use s3gate_core::template::MiniJinjaEngine;
use s3gate_core::{GatewayConfig, S3StoreFactory, TargetRegistry, WebhookManager};
use s3gate_http::GatewayHttpService;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration file used when neither `--config` nor `S3GATE_CONFIG` is set.
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Command line of the gateway.
#[derive(Debug, Parser)]
#[command(name = "s3gate-server", version, about, long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "S3GATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Check the health endpoint of a running gateway and exit.
    #[arg(long)]
    health_check: bool,
}

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the configured log level.
fn init_tracing(server: &ServerConfig) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&server.log_level)
            .with_context(|| format!("invalid log level filter: {}", server.log_level))?
    };

    if server.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    Ok(())
}

/// Reload targets from `path` on every `SIGHUP`.
#[cfg(unix)]
fn spawn_reload_on_sighup(path: PathBuf, registry: Arc<TargetRegistry>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup()).context("cannot listen for SIGHUP")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!(path = %path.display(), "received SIGHUP, reloading configuration");
            let result = match GatewayConfig::load(&path) {
                Ok(config) => registry.reload(&config).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => info!("configuration reloaded"),
                Err(e) => error!(error = %e, "reload failed, keeping previous configuration"),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_path: PathBuf, _registry: Arc<TargetRegistry>) -> Result<()> {
    warn!("configuration reload on SIGHUP is not supported on this platform");
    Ok(())
}

/// Run the accept loop, serving connections until a shutdown signal is received.
async fn serve(listener: TcpListener, service: GatewayHttpService) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained");

    Ok(())
}

/// Request the health endpoint of a running gateway.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /healthz HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"status\":\"ok\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config;
    let config = GatewayConfig::load(&path)
        .with_context(|| format!("cannot load configuration from {}", path.display()))?;

    // Handle --health-check flag for Docker HEALTHCHECK.
    if cli.health_check {
        let addr = config.server.listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&config.server)?;

    info!(
        config = %path.display(),
        listen = %config.server.listen,
        targets = config.targets.len(),
        version = VERSION,
        "starting s3gate server",
    );

    let metrics = Arc::new(PrometheusMetrics::new()?);
    let webhooks = WebhookManager::start(
        config.server.webhook_workers,
        config.server.webhook_queue_capacity,
        Arc::clone(&metrics) as Arc<dyn Metrics>,
    );
    let registry = Arc::new(TargetRegistry::new(
        Arc::new(S3StoreFactory::new(Arc::clone(&metrics) as Arc<dyn Metrics>)),
        webhooks.clone(),
    ));
    registry
        .reload(&config)
        .await
        .context("cannot initialize targets")?;
    spawn_reload_on_sighup(path, Arc::clone(&registry))?;

    let service = GatewayHttpService::new(
        registry,
        webhooks.clone(),
        Arc::new(MiniJinjaEngine::new()),
        metrics,
    );

    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    let result = serve(listener, service).await;
    webhooks.shutdown().await;
    info!("webhook queue drained, exiting");
    result
}
