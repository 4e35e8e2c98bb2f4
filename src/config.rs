// config.rs
//
// Pipeline configuration. Plain structs with defaults; callers construct
// and hand these in, nothing is read from the environment or disk.

use std::path::PathBuf;
use std::time::Duration;

/// Default public host for whisper.cpp GGML weight files.
pub const DEFAULT_MODEL_HOST: &str =
    "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model_store: ModelStoreConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    /// Hard timeout for a single decode call.
    pub decode_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_store: ModelStoreConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            decode_timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelStoreConfig {
    /// Directory holding one weight file per model.
    pub models_dir: PathBuf,
    /// Base URL for descriptors without an explicit source URL.
    pub host: String,
    /// Bound on a download's total elapsed time, checked between chunks.
    /// None disables the check.
    pub download_timeout: Option<Duration>,
}

impl Default for ModelStoreConfig {
    fn default() -> Self {
        Self {
            models_dir: default_data_dir().join("models"),
            host: DEFAULT_MODEL_HOST.to_string(),
            download_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// On-disk entry directory. None keeps the cache memory-only.
    pub dir: Option<PathBuf>,
    pub max_entries: usize,
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_entries: 256,
            // A week; transcripts for unchanged audio do not go stale fast.
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker pool bound. Small by default: decodes are CPU-heavy.
    pub max_concurrent: usize,
    /// Terminal job records retained before oldest-first eviction.
    pub max_retained_results: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_retained_results: 64,
        }
    }
}

/// Base data directory: platform data dir, falling back to the home
/// directory, falling back to the current directory.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxpipe")
}
