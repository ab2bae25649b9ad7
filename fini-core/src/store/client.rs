use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, warn};

use crate::error::{FiniError, Result};
use crate::pack::blockstore::Archive;
use crate::pack::car::read_section;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connect(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

impl TransportError {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::Status { status: 401 | 403, .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connect(_) => true,
            TransportError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// CID the service reports for the stored chunk, when it sends one.
    pub cid: Option<String>,
}

/// One network write of one archive chunk.
pub trait Transport: Send + Sync {
    fn send_chunk(
        &self,
        token: &str,
        chunk: Bytes,
    ) -> impl Future<Output = std::result::Result<ChunkReceipt, TransportError>> + Send;
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sleep before attempt `attempt + 1`, after `attempt` failures.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub chunks: u64,
    pub bytes: u64,
}

/// Regroups the block sections of a CAR stream into complete CARv1 chunks.
/// Every chunk repeats the archive header (and so its root) and holds whole
/// blocks only; a chunk exceeds `limit` only when a single block does.
pub struct CarChunker<R> {
    reader: R,
    header: Vec<u8>,
    pending: Option<Vec<u8>>,
    limit: usize,
}

impl<R: AsyncRead + Unpin> CarChunker<R> {
    pub async fn new(mut reader: R, limit: usize) -> Result<Self> {
        let header = read_section(&mut reader)
            .await?
            .ok_or_else(|| FiniError::Format("empty CAR stream".into()))?;
        Ok(Self {
            reader,
            header,
            pending: None,
            limit,
        })
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = self.header.clone();
        let mut blocks = 0usize;
        loop {
            let section = match self.pending.take() {
                Some(s) => s,
                None => match read_section(&mut self.reader).await? {
                    Some(s) => s,
                    None => break,
                },
            };
            if blocks > 0 && chunk.len() + section.len() > self.limit {
                self.pending = Some(section);
                break;
            }
            chunk.extend_from_slice(&section);
            blocks += 1;
        }
        Ok((blocks > 0).then_some(chunk))
    }
}

/// Streams archives to the blob store as a sequence of CAR chunks.
pub struct StoreClient<T> {
    transport: T,
    policy: RetryPolicy,
    chunk_size: usize,
}

impl<T: Transport> StoreClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, chunk_size: usize) -> Self {
        Self {
            transport,
            policy,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Upload `archive` as a series of standalone CARv1 chunks, calling
    /// `on_stored_chunk(len)` once per chunk after that chunk is accepted.
    /// An empty token fails before any network call.
    pub async fn store<F>(
        &self,
        archive: &Archive,
        token: &str,
        mut on_stored_chunk: F,
    ) -> Result<StoreOutcome>
    where
        F: FnMut(u64),
    {
        if token.trim().is_empty() {
            return Err(FiniError::MissingToken);
        }

        let file = BufReader::new(File::open(archive.store().path()).await?);
        let mut chunks = CarChunker::new(file, self.chunk_size).await?;
        let mut outcome = StoreOutcome::default();
        while let Some(chunk) = chunks.next_chunk().await? {
            let n = chunk.len() as u64;
            let receipt = self
                .send_with_retry(token, Bytes::from(chunk), outcome.chunks)
                .await?;
            debug!(chunk = outcome.chunks, bytes = n, cid = ?receipt.cid, "chunk stored");
            outcome.chunks += 1;
            outcome.bytes += n;
            on_stored_chunk(n);
        }
        Ok(outcome)
    }

    async fn send_with_retry(&self, token: &str, chunk: Bytes, ordinal: u64) -> Result<ChunkReceipt> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let sent = tokio::time::timeout(
                self.policy.attempt_timeout,
                self.transport.send_chunk(token, chunk.clone()),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout));

            let err = match sent {
                Ok(receipt) => return Ok(receipt),
                Err(e) => e,
            };
            if err.is_auth_rejection() {
                return Err(FiniError::store(format!("authentication rejected: {err}")));
            }
            if !err.is_retryable() {
                return Err(FiniError::store(err.to_string()));
            }
            if attempt >= attempts {
                return Err(FiniError::store(format!(
                    "{err} (gave up after {attempts} attempts)"
                )));
            }
            let delay = self.policy.delay_after(attempt);
            warn!(chunk = ordinal, attempt, error = %err, ?delay, "chunk upload failed; retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
