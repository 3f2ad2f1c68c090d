//! Rollcall Node
//!
//! Runs a group of replicas over the in-process command log, the
//! maintenance scheduler, and the health and metrics endpoints.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      rollcall                             │
//! ├──────────────────────────────────────────────────────────┤
//! │  LocalCluster ──► replica 1..N (tiers + coordinator)      │
//! │  Scheduler    ──► reloadCacheData / periodicDelete        │
//! │  :8081 /healthz /livez /readyz    :8080 /metrics          │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rollcall::error::{Error, Result};
use rollcall::{LocalCluster, NodeConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Rollcall - tiered student-record storage with a replicated command log
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Node identifier (generated when absent)
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Number of replicas to run in this process
    #[arg(long, env = "REPLICAS")]
    replicas: Option<usize>,

    /// Students loaded into the cache by each rewarm
    #[arg(long, env = "REWARM_TOP_N")]
    rewarm_top_n: Option<usize>,

    /// Seconds between cache rewarms
    #[arg(long, env = "REWARM_INTERVAL_SECONDS")]
    rewarm_interval_seconds: Option<u64>,

    /// Seconds between volatile sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECONDS")]
    sweep_interval_seconds: Option<u64>,

    /// Milliseconds a mutation waits to be ordered by the log
    #[arg(long, env = "SUBMIT_TIMEOUT_MS")]
    submit_timeout_ms: Option<u64>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    let span = info_span!("node", node = %config.node_id);
    run(args, config).instrument(span).await
}

async fn run(args: Args, config: NodeConfig) -> Result<()> {
    info!("Starting Rollcall node {}", config.node_id);
    info!("  Replicas: {}", config.replicas);
    info!("  Renewal window: {}s", config.renewal_window_secs);
    info!("  Rewarm: top {} every {}s", config.rewarm_top_n, config.rewarm_interval_secs);
    info!("  Sweep interval: {}s", config.sweep_interval_secs);
    info!("  Submit timeout: {}ms", config.submit_timeout_ms);

    let cluster = LocalCluster::start(config.clone()).await?;
    let leader = cluster
        .node(0)
        .ok_or_else(|| Error::Config("no replicas configured".into()))?;

    let shutdown = CancellationToken::new();
    let scheduler = leader.scheduler(&config).with_cancellation(shutdown.clone());
    let tickers = scheduler.spawn();

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(
        async move {
            if let Err(e) = run_health_server(&health_addr).await {
                error!("Health server error: {}", e);
            }
        }
        .in_current_span(),
    );

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(
        async move {
            if let Err(e) = run_metrics_server(&metrics_addr).await {
                error!("Metrics server error: {}", e);
            }
        }
        .in_current_span(),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for ticker in tickers {
        if let Err(e) = ticker.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
    cluster.settle().await;

    info!("Node shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            NodeConfig::from_yaml_file(path)?
        }
        None => NodeConfig::default(),
    };

    if let Some(replicas) = args.replicas {
        config.replicas = replicas;
    }
    if let Some(top_n) = args.rewarm_top_n {
        config.rewarm_top_n = top_n;
    }
    if let Some(secs) = args.rewarm_interval_seconds {
        config.rewarm_interval_secs = secs;
    }
    if let Some(secs) = args.sweep_interval_seconds {
        config.sweep_interval_secs = secs;
    }
    if let Some(ms) = args.submit_timeout_ms {
        config.submit_timeout_ms = ms;
    }
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }
    config.ensure_node_id();

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

type Body = http_body_util::Full<bytes::Bytes>;
type HandlerResult = std::result::Result<hyper::Response<Body>, std::convert::Infallible>;

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<bytes::Bytes>,
) -> hyper::Response<Body> {
    let mut response = hyper::Response::new(Body::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn serve<F, Fut>(addr: &str, name: &'static str, handler: F) -> Result<()>
where
    F: Fn(hyper::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid {} server address: {}", name, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("{} server accept error: {}", name, e)))?;

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                error!("{} server connection error: {}", name, e);
            }
        });
    }
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::{Request, StatusCode};

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> HandlerResult {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    serve(addr, "Health", health_handler).await
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Request, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    // Register the counters before the first scrape
    if let Err(e) = rollcall::metrics::METRICS.as_ref() {
        error!("Metrics unavailable: {}", e);
    }

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> HandlerResult {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&prometheus::gather(), &mut buffer) {
                    Ok(()) => {
                        let mut response = text_response(StatusCode::OK, buffer);
                        response
                            .headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                        response
                    }
                    Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                }
            }
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    serve(addr, "Metrics", metrics_handler).await
}
