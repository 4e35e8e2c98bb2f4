// model/store.rs
//
// ModelStore guarantees that a requested model's weight file exists on
// local storage and passes a basic integrity check before the decoder
// runs. Downloads stream to a `.part` file beside the destination and are
// only renamed into place after verification, so the final path never
// holds a partially-written file.

use super::ModelDescriptor;
use crate::config::ModelStoreConfig;
use crate::error::ModelError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex, RwLock};

/// Accepted leading-byte signatures for GGML-family weight files, both
/// byte orders plus GGUF.
const MAGIC_SIGNATURES: [&[u8]; 6] = [b"ggml", b"GGUF", b"ggmf", b"lmgg", b"FUGU", b"fmgg"];

/// A file is considered plausibly complete at 90% of the catalog size;
/// catalog sizes are approximate. The magic check is the precise gate.
const SIZE_TOLERANCE_NUM: u64 = 9;
const SIZE_TOLERANCE_DEN: u64 = 10;

/// Per-chunk progress observer: (bytes received, bytes total).
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Per-descriptor download lifecycle, observable via [`ModelStore::state`].
/// Transient; the on-disk file is the persistent source of truth.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum DownloadState {
    Idle,
    Downloading { received: u64, total: u64 },
    Completed,
    Failed(String),
}

/// An opened weight transfer: content length when the server reported one,
/// and the chunked body.
pub struct FetchedStream {
    pub total: Option<u64>,
    pub stream: BoxStream<'static, anyhow::Result<Bytes>>,
}

/// Byte-stream source for weight files. The production impl is a thin
/// reqwest wrapper; tests substitute scripted streams.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedStream>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedStream> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from))
            .boxed();
        Ok(FetchedStream { total, stream })
    }
}

/// Outcome shared between a download leader and any callers that arrived
/// while the transfer was in flight.
#[derive(Clone)]
enum SharedOutcome {
    Ready(PathBuf),
    DownloadFailed(String),
    Corrupt(String),
    Io(String),
}

impl SharedOutcome {
    fn from_result(result: &Result<PathBuf, ModelError>) -> Self {
        match result {
            Ok(path) => Self::Ready(path.clone()),
            Err(ModelError::DownloadFailed(reason)) => Self::DownloadFailed(reason.clone()),
            Err(ModelError::CorruptDownload(reason)) => Self::Corrupt(reason.clone()),
            Err(ModelError::Io(e)) => Self::Io(e.to_string()),
        }
    }

    fn into_result(self) -> Result<PathBuf, ModelError> {
        match self {
            Self::Ready(path) => Ok(path),
            Self::DownloadFailed(reason) => Err(ModelError::DownloadFailed(reason)),
            Self::Corrupt(reason) => Err(ModelError::CorruptDownload(reason)),
            Self::Io(reason) => Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                reason,
            ))),
        }
    }
}

pub struct ModelStore {
    config: ModelStoreConfig,
    fetcher: Arc<dyn ModelFetcher>,
    states: RwLock<HashMap<String, DownloadState>>,
    // In-flight transfers keyed by descriptor id. A second caller for the
    // same descriptor subscribes here instead of starting a second
    // download.
    in_flight: Mutex<HashMap<String, broadcast::Sender<SharedOutcome>>>,
}

impl ModelStore {
    pub fn new(config: ModelStoreConfig, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self {
            config,
            fetcher,
            states: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.config.models_dir
    }

    /// Current download lifecycle for a descriptor.
    pub async fn state(&self, descriptor: &ModelDescriptor) -> DownloadState {
        self.states
            .read()
            .await
            .get(&descriptor.id)
            .cloned()
            .unwrap_or(DownloadState::Idle)
    }

    async fn set_state(&self, id: &str, state: DownloadState) {
        self.states.write().await.insert(id.to_string(), state);
    }

    /// Return the verified local path for a model, downloading it first if
    /// the file is absent or fails the integrity check. Concurrent calls
    /// for the same descriptor share a single transfer and its outcome.
    pub async fn ensure_available(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<PathBuf, ModelError> {
        self.ensure_available_with_progress(descriptor, None).await
    }

    pub async fn ensure_available_with_progress(
        &self,
        descriptor: &ModelDescriptor,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelError> {
        let path = descriptor.local_path(&self.config.models_dir);

        // Cheap happy path: file present and plausible, no network access.
        if verify_file(&path, descriptor.expected_size).await.is_ok() {
            return Ok(path);
        }

        // Check-and-set under the in-flight lock so exactly one caller
        // becomes the download leader.
        let mut receiver = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&descriptor.id) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    in_flight.insert(descriptor.id.clone(), sender);
                    None
                }
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            info!(
                "model '{}' already downloading, waiting for in-flight transfer",
                descriptor.id
            );
            return match receiver.recv().await {
                Ok(outcome) => outcome.into_result(),
                // Leader dropped without sending; should not happen, but
                // surface it as a failed download rather than hanging.
                Err(_) => Err(ModelError::DownloadFailed(
                    "in-flight download ended without an outcome".to_string(),
                )),
            };
        }

        let result = self.download_with_progress(descriptor, progress).await;

        let sender = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(&descriptor.id)
        };
        if let Some(sender) = sender {
            // No receivers is fine; nobody else asked while we ran.
            let _ = sender.send(SharedOutcome::from_result(&result));
        }

        result
    }

    /// Stream the weight file to `<file>.part`, verify it, and rename it
    /// into place. Every failure path removes the temp file.
    pub async fn download(&self, descriptor: &ModelDescriptor) -> Result<PathBuf, ModelError> {
        self.download_with_progress(descriptor, None).await
    }

    async fn download_with_progress(
        &self,
        descriptor: &ModelDescriptor,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelError> {
        let path = descriptor.local_path(&self.config.models_dir);
        let part_path = path.with_extension("part");

        tokio::fs::create_dir_all(&self.config.models_dir).await?;

        let url = descriptor.resolve_url(&self.config.host);
        info!("downloading model '{}' from {}", descriptor.id, url);
        self.set_state(&descriptor.id, DownloadState::Downloading { received: 0, total: 0 })
            .await;

        let result = self
            .stream_to_part(descriptor, &url, &part_path, progress)
            .await;

        match result {
            Ok(()) => {}
            Err(e) => {
                remove_quietly(&part_path).await;
                self.set_state(&descriptor.id, DownloadState::Failed(e.to_string()))
                    .await;
                return Err(e);
            }
        }

        // Verify the temp file before it may take the final name.
        if let Err(reason) = verify_file(&part_path, descriptor.expected_size).await {
            remove_quietly(&part_path).await;
            self.set_state(&descriptor.id, DownloadState::Failed(reason.clone()))
                .await;
            return Err(ModelError::CorruptDownload(reason));
        }

        if let Err(e) = tokio::fs::rename(&part_path, &path).await {
            remove_quietly(&part_path).await;
            self.set_state(&descriptor.id, DownloadState::Failed(e.to_string()))
                .await;
            return Err(e.into());
        }
        self.set_state(&descriptor.id, DownloadState::Completed).await;
        info!("model '{}' downloaded to {}", descriptor.id, path.display());
        Ok(path)
    }

    async fn stream_to_part(
        &self,
        descriptor: &ModelDescriptor,
        url: &str,
        part_path: &Path,
        progress: Option<ProgressFn>,
    ) -> Result<(), ModelError> {
        let fetched = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;

        let total = fetched.total.unwrap_or(0);
        if total == 0 {
            warn!(
                "no content length for model '{}'; progress will report total=0",
                descriptor.id
            );
        }

        let mut file = tokio::fs::File::create(part_path).await?;
        let mut stream = fetched.stream;
        let mut received: u64 = 0;
        let started = Instant::now();

        while let Some(chunk) = stream.next().await {
            if let Some(limit) = self.config.download_timeout {
                if started.elapsed() > limit {
                    return Err(ModelError::DownloadFailed(format!(
                        "download exceeded {:?}",
                        limit
                    )));
                }
            }

            let chunk = chunk.map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            self.set_state(
                &descriptor.id,
                DownloadState::Downloading { received, total },
            )
            .await;
            if let Some(ref progress) = progress {
                progress(received, total);
            }
        }

        file.flush().await?;
        Ok(())
    }

    /// Delete a model's local file, if present.
    pub async fn remove(&self, descriptor: &ModelDescriptor) -> Result<(), ModelError> {
        let path = descriptor.local_path(&self.config.models_dir);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            info!("removed model file {}", path.display());
        }
        self.set_state(&descriptor.id, DownloadState::Idle).await;
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove temp file {}: {}", path.display(), e);
        }
    }
}

/// Size-and-magic integrity check. Err carries a human-readable reason.
async fn verify_file(path: &Path, expected_size: Option<u64>) -> Result<(), String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))?;

    if let Some(expected) = expected_size {
        let minimum = expected * SIZE_TOLERANCE_NUM / SIZE_TOLERANCE_DEN;
        if metadata.len() < minimum {
            return Err(format!(
                "file is {} bytes, expected at least {}",
                metadata.len(),
                minimum
            ));
        }
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header)
        .await
        .map_err(|e| format!("short read on {}: {}", path.display(), e))?;

    if MAGIC_SIGNATURES.iter().any(|magic| header.starts_with(magic)) {
        Ok(())
    } else {
        Err(format!(
            "missing GGML/GGUF magic, found {:?}",
            String::from_utf8_lossy(&header[..4])
        ))
    }
}
