use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

use super::ReadAt;
use anyhow::{Result, anyhow, bail};

/// HTTP Range reader for remote ZIP files
///
/// The remote size is probed once by [`ReadAt::init`]; until then the reader
/// reports a size of zero.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: OnceCell<u64>,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeReader {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            size: OnceCell::new(),
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        })
    }

    /// Number of attempts per range request on timeouts and connect errors
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Finds the remote size, preferring HEAD and falling back to a one-byte
    /// range request for servers that refuse HEAD or omit Content-Length.
    async fn probe(&self) -> Result<u64> {
        match self.client.head(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let ranges = resp
                    .headers()
                    .get(ACCEPT_RANGES)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none");
                if ranges.contains("bytes")
                    && let Some(size) = header_u64(&resp, CONTENT_LENGTH)
                {
                    return Ok(size);
                }
                debug!("HEAD {} gave no usable size, probing with a range", self.url);
            }
            Ok(resp) => debug!("HEAD {} returned {}", self.url, resp.status()),
            Err(e) => debug!("HEAD {} failed: {}", self.url, e),
        }

        let resp = self.fetch("bytes=0-0").await?;
        let total = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| anyhow!("HTTP Range not supported by {}", self.url))?;
        let body = resp.bytes().await?;
        self.transferred_bytes
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        Ok(total)
    }

    /// Sends one range request, retrying on timeouts and connect errors.
    async fn fetch(&self, range: &str) -> Result<Response> {
        let mut retry_count = 0;
        loop {
            let result = self
                .client
                .get(&self.url)
                .header(RANGE, range)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => return Ok(resp),
                Ok(resp) => bail!("HTTP Range {} failed with status: {}", range, resp.status()),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded for {}", range);
                    }
                    warn!(
                        "Connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn header_u64(resp: &Response, name: reqwest::header::HeaderName) -> Option<u64> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Total length from a `Content-Range: bytes a-b/total` value
fn content_range_total(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    rest.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn init(&self) -> Result<()> {
        let size = self.size.get_or_try_init(|| self.probe()).await?;
        debug!("{} is {} bytes", self.url, size);
        Ok(())
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(size - 1);
        let expected_size = (end - offset + 1) as usize;
        let mut received = 0;

        // A server may answer with a shorter range than asked for
        while received < expected_size {
            let range = format!("bytes={}-{}", offset + received as u64, end);
            let bytes = self.fetch(&range).await?.bytes().await?;
            if bytes.is_empty() {
                bail!("HTTP Range {} returned no data", range);
            }
            let chunk_len = bytes.len().min(expected_size - received);
            buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
            received += chunk_len;

            self.transferred_bytes
                .fetch_add(chunk_len as u64, Ordering::Relaxed);
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size.get().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_totals() {
        assert_eq!(content_range_total("bytes 0-0/1234"), Some(1234));
        assert_eq!(content_range_total("Bytes 0-0/ 99 "), Some(99));
        assert_eq!(content_range_total("bytes 0-0/*"), None);
        assert_eq!(content_range_total("items 0-0/10"), None);
    }

    #[tokio::test]
    async fn unprobed_reader_is_empty() {
        let reader = HttpRangeReader::new("http://127.0.0.1:9/a.zip").unwrap();
        assert_eq!(reader.size(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(0, &mut buf).await.unwrap(), 0);
    }
}
