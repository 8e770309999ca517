//! HTTP readiness polling

use jstd_common::Result;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, trace, warn};

/// Delay between probes that got an answer other than 200
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Delay after a probe that could not connect at all
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes an URL until it answers 200.
///
/// The poller has no deadline of its own; callers race it against whatever
/// owns the overall timeout.
#[derive(Debug, Clone)]
pub struct HealthPoller {
    client: reqwest::Client,
    interval: Duration,
    error_backoff: Duration,
}

impl HealthPoller {
    pub fn new() -> Result<Self> {
        Self::with_intervals(DEFAULT_POLL_INTERVAL, DEFAULT_ERROR_BACKOFF)
    }

    pub fn with_intervals(interval: Duration, error_backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            interval,
            error_backoff,
        })
    }

    /// Resolve once `url` answers 200. Returns the number of probes sent.
    pub async fn wait_ready(&self, url: &str) -> u32 {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.client.get(url).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    return attempts;
                }
                Ok(resp) => {
                    trace!("Health check on {} returned {}", url, resp.status());
                    sleep(self.interval).await;
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} to come up...", url);
                    }
                    // Connection refused is expected while the server is starting
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                    sleep(self.error_backoff).await;
                }
            }
        }
    }
}
