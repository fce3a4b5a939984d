//! Network seam: fetch one remote resource into a local file.

use futures_util::StreamExt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const MAX_REDIRECTS: usize = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Log download progress every this many percent.
const PROGRESS_STEP_PCT: u64 = 10;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can copy a URL's body into `dest`.
///
/// Returns the number of bytes written. Implementations create or truncate
/// `dest`; cleaning up after a failure is the caller's job.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> impl Future<Output = Result<u64, FetchError>> + Send;
}

/// HTTP(S) fetcher streaming the response body to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("restorico/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        tracing::debug!(url, total_bytes = total, "download started");

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP_PCT;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if total > 0 {
                let pct = written * 100 / total;
                if pct >= next_report {
                    tracing::info!(url, percent = pct, "downloading");
                    next_report = (pct / PROGRESS_STEP_PCT + 1) * PROGRESS_STEP_PCT;
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}
