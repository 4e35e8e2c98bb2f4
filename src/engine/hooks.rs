// engine/hooks.rs
//
// Narrow extension hooks, run as ordered lists handed to the engine at
// construction. A failing hook degrades (the pipeline continues with its
// input unchanged); it never aborts the job.

use super::TranscriptionResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Runs against the prepared audio file before the decoder sees it, e.g.
/// denoising or loudness normalization. Returning `Some(path)` substitutes
/// a new file for the remaining stages; the hook owns that file's
/// lifetime.
#[async_trait]
pub trait AudioPreprocessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, audio: &Path) -> anyhow::Result<Option<PathBuf>>;
}

/// Rewrites the structured result after decoding, before formatters run.
#[async_trait]
pub trait ResultPostprocessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, result: TranscriptionResult)
        -> anyhow::Result<TranscriptionResult>;
}

/// Pure text-to-text rewrite applied to the final transcript, in list
/// order.
pub trait TextFormatter: Send + Sync {
    fn name(&self) -> &'static str;

    fn format(&self, text: &str) -> String;
}
