//! Periodic Stats Reporter
//!
//! Refreshes the driver's capacity report on a fixed interval, the way the
//! host framework polls backends for capabilities.

use crate::domain::ports::{VolumeDriver, VolumeStats};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default refresh interval
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted refresh interval
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Background task refreshing volume stats
pub struct StatsReporter {
    driver: Arc<dyn VolumeDriver>,
    interval: Duration,
}

impl StatsReporter {
    /// Create a reporter, raising the interval to at least [`MIN_REPORT_INTERVAL`]
    pub fn new(driver: Arc<dyn VolumeDriver>, interval: Duration) -> Self {
        Self {
            driver,
            interval: interval.max(MIN_REPORT_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Refresh the stats once
    pub async fn refresh_once(&self) -> Result<Option<VolumeStats>> {
        let stats = self.driver.get_volume_stats(true).await?;

        if let Some(stats) = &stats {
            debug!(
                "{}: {} GB free of {} GB ({})",
                stats.volume_backend_name,
                stats.free_capacity_gb,
                stats.total_capacity_gb,
                stats.storage_protocol
            );
        }

        Ok(stats)
    }

    /// Refresh on every tick until shutdown is signalled
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Stats reporter for {} started (every {:?})",
            self.driver.driver_name(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        warn!("Failed to refresh volume stats: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Stats reporter shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::configuration::Configuration;
    use crate::driver::testing::{CliCall, RecordingCli};
    use crate::driver::VnxIscsiDriver;
    use crate::error::Error;

    fn reporter(interval: Duration) -> (StatsReporter, Arc<RecordingCli>) {
        let cli = Arc::new(RecordingCli::new());
        let driver = Arc::new(VnxIscsiDriver::with_cli(
            Configuration::new("vnx"),
            cli.clone(),
        ));
        (StatsReporter::new(driver, interval), cli)
    }

    #[test]
    fn test_refresh_once() {
        let (reporter, cli) = reporter(DEFAULT_REPORT_INTERVAL);

        let stats = tokio_test::block_on(reporter.refresh_once()).unwrap().unwrap();
        assert_eq!(stats.storage_protocol, "iSCSI");
        assert_eq!(cli.calls(), vec![CliCall::UpdateVolumeStatus]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refreshes_until_shutdown() {
        let (reporter, cli) = reporter(Duration::from_secs(60));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        // The first refresh fails; the reporter keeps going
        cli.fail_next(Error::ArrayUnavailable {
            array: "APM00123456789".into(),
        });

        let handle = tokio::spawn(async move { reporter.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // Ticks at 0s, 60s and 120s
        assert_eq!(cli.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_clamped() {
        let (reporter, cli) = reporter(Duration::ZERO);
        assert_eq!(reporter.interval(), MIN_REPORT_INTERVAL);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { reporter.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // Ticks at 0s, 1s and 2s
        assert_eq!(cli.calls().len(), 3);
    }
}
