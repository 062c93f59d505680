//! Driver API Server
//!
//! Runs the REST server for the volume driver until shutdown is signalled.

use crate::domain::ports::VolumeDriver;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::{ApiMetrics, RestRouter};

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Max request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8776)),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST server for one volume driver
pub struct ApiServer {
    config: ApiServerConfig,
    driver: Arc<dyn VolumeDriver>,
    metrics: Arc<ApiMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        driver: Arc<dyn VolumeDriver>,
        metrics: Arc<ApiMetrics>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            metrics,
            shutdown_tx,
        }
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the API server until shutdown
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let app = RestRouter::new(self.driver.clone(), self.metrics.clone())
            .with_max_body_size(self.config.max_body_size)
            .build();

        info!(
            "REST API for {} listening on {}",
            self.driver.driver_name(),
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            Error::Internal(format!("Failed to bind REST server: {}", e))
        })?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::configuration::Configuration;
    use crate::driver::VnxIscsiDriver;
    use prometheus::Registry;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8776);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let driver = Arc::new(VnxIscsiDriver::new(Configuration::new("vnx")).unwrap());
        let metrics = Arc::new(ApiMetrics::register(&Registry::new()).unwrap());
        let config = ApiServerConfig {
            rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = Arc::new(ApiServer::new(config, driver, metrics));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
