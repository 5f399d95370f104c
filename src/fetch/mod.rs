// src/fetch/mod.rs

pub mod rotate;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::schema::{table::RawTable, write};

pub use rotate::{archive_path, install, FetchOutcome};

/// Upstream location of the generated ECS field list.
pub const ECS_CSV_URL: &str =
    "https://raw.githubusercontent.com/elastic/ecs/refs/heads/main/generated/csv/fields.csv";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub url: Url,
    pub dest: PathBuf,
    /// Rotate even when the content matches the local copy.
    pub force: bool,
    pub retry: RetryPolicy,
}

impl RetryPolicy {
    /// Wait before retry `attempt` (1-based), doubling each time.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

async fn get_once(client: &Client, url: &Url) -> Result<String, reqwest::Error> {
    debug!(%url, "GET");
    client.get(url.clone()).send().await?.error_for_status()?.text().await
}

/// GET `url`, retrying both transport and HTTP status failures.
async fn download(client: &Client, url: &Url, retry: RetryPolicy) -> Result<String> {
    let mut attempt = 0;
    loop {
        let err = match get_once(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) => e,
        };
        if attempt >= retry.max_retries {
            error!(%url, attempts = attempt + 1, error = %err, "giving up");
            return Err(Error::Transport {
                url: url.to_string(),
                source: err,
            });
        }
        attempt += 1;
        let delay = retry.backoff(attempt);
        warn!(%url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        sleep(delay).await;
    }
}

/// Download the field list and install it at `cfg.dest`.
///
/// Nothing on disk changes unless the download succeeds and parses as an
/// ECS field list.
#[instrument(level = "info", skip(client, cfg), fields(url = %cfg.url, dest = %cfg.dest.display()))]
pub async fn fetch(client: &Client, cfg: &FetchConfig) -> Result<FetchOutcome> {
    if write::clear_stale_staging(&cfg.dest)? {
        info!("removed staging file from an earlier run");
    }

    let body = download(client, &cfg.url, cfg.retry).await?;
    info!(bytes = body.len(), "downloaded");

    let label = Path::new(cfg.url.as_str());
    let incoming = RawTable::from_reader(label, body.as_bytes())?;
    // also rejects rows with a bad indexed flag or missing key columns
    incoming.field_records()?;

    install(&cfg.dest, body.as_bytes(), &incoming, cfg.force)
}
