use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

use crate::core::config::HealthcheckSettings;

/// Largest log tail sent with the final ping
pub const MAX_BODY_BYTES: u64 = 10_000;

/// healthchecks.io-style pinger for one check.
///
/// Every ping of a run carries the same `rid` so the service can pair
/// the start signal with the result.
pub struct HealthcheckPinger {
    client: Client,
    base_url: String,
    check: Uuid,
    run_id: Uuid,
    attempts: u32,
    retry_delay: Duration,
}

impl HealthcheckPinger {
    pub fn new(settings: &HealthcheckSettings, check: Uuid) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            check,
            run_id: Uuid::new_v4(),
            attempts: settings.retries.max(1),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Override the pause between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ping URL, `suffix` being `start` or an exit code
    pub fn url(&self, suffix: &str) -> String {
        format!("{}/{}/{}?rid={}", self.base_url, self.check, suffix, self.run_id)
    }

    /// Signal that the job started. Failures are only logged.
    pub async fn start(&self) {
        if let Err(e) = self.ping("start", String::new()).await {
            warn!("Healthcheck start ping failed: {:#}", e);
        }
    }

    /// Report the job's exit code (0 for success) with a log excerpt.
    /// Failures are only logged.
    pub async fn finish(&self, code: i32, body: String) {
        match self.ping(&code.to_string(), body).await {
            Ok(()) => info!("Reported exit code {} to healthcheck {}", code, self.check),
            Err(e) => warn!("Healthcheck result ping failed: {:#}", e),
        }
    }

    async fn ping(&self, suffix: &str, body: String) -> Result<()> {
        let url = self.url(suffix);
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            debug!("Pinging {} (attempt {}/{})", url, attempt, self.attempts);
            let result = self.client.post(&url).body(body.clone()).send().await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = Some(anyhow::anyhow!("{} returned {}", url, response.status()))
                }
                Err(e) => last_error = Some(anyhow::Error::new(e).context(format!("POST {}", url))),
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no ping attempt made to {}", url)))
    }
}
