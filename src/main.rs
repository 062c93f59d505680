//! VNX iSCSI Driver Service
//!
//! Runs the VNX iSCSI volume driver behind a REST API, refreshing backend
//! stats in the background and exposing health and Prometheus endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vnx_iscsi_driver::driver::configuration::DEFAULT_SECTION;
use vnx_iscsi_driver::{
    ApiMetrics, ApiServer, ApiServerConfig, Configuration, Error, Result, StatsReporter,
    VnxIscsiDriver, VolumeDriver,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// VNX iSCSI Driver - block storage volume driver for EMC VNX arrays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8776")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// YAML file with backend sections
    #[arg(long, env = "VNX_CONFIG")]
    config: Option<String>,

    /// Backend section to load
    #[arg(long, env = "VNX_BACKEND", default_value = DEFAULT_SECTION)]
    backend: String,

    /// Stats refresh interval in seconds
    #[arg(long, env = "STATS_INTERVAL", default_value = "60")]
    stats_interval_secs: u64,

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

    // Initialize logging
    init_logging(&args);

    info!("Starting VNX iSCSI Driver");
    info!("  Version: {}", vnx_iscsi_driver::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Backend section: {}", args.backend);
    info!("  Stats interval: {}s", args.stats_interval_secs);

    // Load backend configuration
    let configuration = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Configuration::from_yaml_file(path, &args.backend)?
        }
        None => Configuration::new(args.backend.clone()),
    };

    // Create driver
    let driver = Arc::new(VnxIscsiDriver::new(configuration)?);
    driver.check_for_setup_error().await?;
    info!("Driver {} initialized", driver.driver_name());

    let metrics = Arc::new(ApiMetrics::register(prometheus::default_registry())?);

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        ..Default::default()
    };
    let api_server = Arc::new(ApiServer::new(api_config, driver.clone(), metrics));

    // Start stats reporter
    let reporter = StatsReporter::new(driver, Duration::from_secs(args.stats_interval_secs));
    let reporter_shutdown = api_server.subscribe_shutdown();
    tokio::spawn(async move { reporter.run(reporter_shutdown).await });

    // Shut down on Ctrl-C
    let signal_server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    info!("Driver shutdown complete");
    Ok(())
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
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
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
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::from("ok"));
            match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {}
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::empty());
            match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            if let Ok(value) = encoder.format_type().parse() {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            *response.body_mut() = Body::from(e.to_string());
                        }
                    }
                }
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
