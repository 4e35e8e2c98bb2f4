// engine/decoder.rs
//
// Collaborator traits for the native decoder and the audio conversion
// utility. Both are injected at engine construction; production impls
// live with the application shell, tests use stubs.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// The exact call payload the native decoder expects.
#[derive(Debug, Clone)]
pub struct DecoderInvocation {
    pub audio_path: PathBuf,
    pub model_path: PathBuf,
    /// Language code, or None for auto-detect.
    pub language: Option<String>,
    pub translate: bool,
    pub threads: usize,
    pub processors: usize,
    pub no_timestamps: bool,
    pub split_on_word: bool,
}

/// One decoded segment, offsets in centiseconds as the decoder reports
/// them.
#[derive(Debug, Clone)]
pub struct DecoderSegment {
    pub start: i64,
    pub end: i64,
    pub text: String,
}

/// Raw decoder output. A missing `text` field signals failure; `error`
/// carries the decoder's own message when it produced one.
#[derive(Debug, Clone, Default)]
pub struct DecoderOutput {
    pub text: Option<String>,
    pub segments: Vec<DecoderSegment>,
    pub language: Option<String>,
    pub error: Option<String>,
}

/// The pretrained acoustic model behind an opaque call: PCM audio in,
/// text and segments out. CPU-bound; the engine bounds it with a timeout.
#[async_trait]
pub trait SpeechDecoder: Send + Sync {
    async fn decode(&self, invocation: DecoderInvocation) -> anyhow::Result<DecoderOutput>;

    /// For logging.
    fn name(&self) -> &'static str;
}

/// External conversion utility normalizing arbitrary input audio to
/// 16 kHz mono signed-16-bit PCM at `output`. Failure is non-fatal per
/// the engine's degraded-quality fallback.
#[async_trait]
pub trait AudioConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> anyhow::Result<()>;
}
