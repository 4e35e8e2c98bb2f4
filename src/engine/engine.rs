// engine/engine.rs
//
// TranscriptionEngine adapts a validated request plus a resolved model
// path into the decoder's call contract and maps its raw output back into
// a TranscriptionResult. Stateless across calls; job state lives in the
// queue.

use super::decoder::{AudioConverter, DecoderInvocation, SpeechDecoder};
use super::hooks::{AudioPreprocessor, ResultPostprocessor, TextFormatter};
use super::pcm;
use crate::error::EngineError;
use crate::queue::Priority;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Immutable job parameters handed into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub audio_path: PathBuf,
    /// Catalog id of the model to decode with.
    pub model: String,
    /// Language code; None means auto-detect.
    pub language: Option<String>,
    pub translate: bool,
    pub timestamps: bool,
    pub split_on_word: bool,
    /// Decoder thread hint; derived from core count when unset.
    pub threads: Option<usize>,
    pub processors: Option<usize>,
    pub priority: Priority,
}

impl TranscriptionRequest {
    pub fn new(audio_path: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            audio_path: audio_path.into(),
            model: model.into(),
            language: None,
            translate: false,
            timestamps: true,
            split_on_word: false,
            threads: None,
            processors: None,
            priority: Priority::Normal,
        }
    }
}

/// One transcript segment; offsets in centiseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
    pub text: String,
}

/// Created once by the engine on success; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub duration: Duration,
    /// Language the decoder settled on.
    pub language: String,
    /// True when format conversion failed and the original file was fed to
    /// the decoder directly (degraded quality, not an error).
    pub conversion_fallback: bool,
}

pub struct TranscriptionEngine {
    decoder: Arc<dyn SpeechDecoder>,
    converter: Arc<dyn AudioConverter>,
    preprocessors: Vec<Arc<dyn AudioPreprocessor>>,
    postprocessors: Vec<Arc<dyn ResultPostprocessor>>,
    formatters: Vec<Arc<dyn TextFormatter>>,
    decode_timeout: Duration,
}

impl TranscriptionEngine {
    pub fn new(
        decoder: Arc<dyn SpeechDecoder>,
        converter: Arc<dyn AudioConverter>,
        decode_timeout: Duration,
    ) -> Self {
        Self {
            decoder,
            converter,
            preprocessors: Vec::new(),
            postprocessors: Vec::new(),
            formatters: Vec::new(),
            decode_timeout,
        }
    }

    pub fn with_preprocessors(mut self, hooks: Vec<Arc<dyn AudioPreprocessor>>) -> Self {
        self.preprocessors = hooks;
        self
    }

    pub fn with_postprocessors(mut self, hooks: Vec<Arc<dyn ResultPostprocessor>>) -> Self {
        self.postprocessors = hooks;
        self
    }

    pub fn with_formatters(mut self, formatters: Vec<Arc<dyn TextFormatter>>) -> Self {
        self.formatters = formatters;
        self
    }

    /// Run one transcription against an already-resolved model file.
    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
        model_path: &Path,
    ) -> Result<TranscriptionResult, EngineError> {
        let started = Instant::now();

        let metadata = tokio::fs::metadata(&request.audio_path).await.map_err(|e| {
            EngineError::InvalidInput(format!(
                "cannot read {}: {}",
                request.audio_path.display(),
                e
            ))
        })?;
        if metadata.len() == 0 {
            return Err(EngineError::InvalidInput(format!(
                "{} is empty",
                request.audio_path.display()
            )));
        }

        // Normalize to the decoder's required PCM format. A failed
        // conversion degrades to feeding the original file; it does not
        // abort the job.
        let mut audio = request.audio_path.clone();
        let mut converted_temp: Option<PathBuf> = None;
        let mut conversion_fallback = false;

        if !pcm::is_decoder_ready(&audio) {
            let temp = std::env::temp_dir().join(format!("voxpipe-{}.wav", uuid::Uuid::new_v4()));
            match self.converter.convert(&audio, &temp).await {
                Ok(()) => {
                    debug!(
                        "converted {} to decoder format at {}",
                        audio.display(),
                        temp.display()
                    );
                    audio = temp.clone();
                    converted_temp = Some(temp);
                }
                Err(e) => {
                    warn!(
                        "audio conversion failed for {}, passing original to decoder: {}",
                        audio.display(),
                        e
                    );
                    conversion_fallback = true;
                }
            }
        }

        for hook in &self.preprocessors {
            match hook.process(&audio).await {
                Ok(Some(replacement)) => {
                    debug!("preprocessor '{}' substituted {}", hook.name(), replacement.display());
                    audio = replacement;
                }
                Ok(None) => {}
                Err(e) => warn!("preprocessor '{}' failed, skipping: {}", hook.name(), e),
            }
        }

        let invocation = DecoderInvocation {
            audio_path: audio,
            model_path: model_path.to_path_buf(),
            language: request.language.clone(),
            translate: request.translate,
            threads: effective_count(request.threads),
            processors: effective_count(request.processors),
            no_timestamps: !request.timestamps,
            split_on_word: request.split_on_word,
        };

        let decoded =
            tokio::time::timeout(self.decode_timeout, self.decoder.decode(invocation)).await;

        // The temp file is no longer needed whatever the outcome.
        if let Some(temp) = converted_temp {
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                warn!("failed to remove converted audio {}: {}", temp.display(), e);
            }
        }

        let output = match decoded {
            Err(_) => return Err(EngineError::Timeout(self.decode_timeout)),
            Ok(Err(e)) => return Err(EngineError::DecoderUnavailable(e.to_string())),
            Ok(Ok(output)) => output,
        };

        let text = match output.text {
            Some(text) => text,
            None => {
                let reason = output
                    .error
                    .unwrap_or_else(|| "decoder returned no text".to_string());
                return Err(EngineError::ProcessingFailed(reason));
            }
        };

        let mut result = TranscriptionResult {
            text,
            segments: output
                .segments
                .into_iter()
                .map(|s| Segment {
                    start: s.start,
                    end: s.end,
                    text: s.text,
                })
                .collect(),
            duration: started.elapsed(),
            language: output
                .language
                .or_else(|| request.language.clone())
                .unwrap_or_else(|| "auto".to_string()),
            conversion_fallback,
        };

        for hook in &self.postprocessors {
            match hook.process(result.clone()).await {
                Ok(updated) => result = updated,
                Err(e) => warn!("postprocessor '{}' failed, skipping: {}", hook.name(), e),
            }
        }
        for formatter in &self.formatters {
            result.text = formatter.format(&result.text);
        }

        info!(
            "decoded {} with '{}' in {:.2}s ({} segments)",
            request.audio_path.display(),
            self.decoder.name(),
            result.duration.as_secs_f64(),
            result.segments.len()
        );

        Ok(result)
    }
}

/// Thread/processor hint, clamped to [1, 8] to avoid oversubscription on
/// constrained devices; defaults to the available core count.
fn effective_count(hint: Option<usize>) -> usize {
    let count = hint.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    count.clamp(1, 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::decoder::{DecoderOutput, DecoderSegment};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct StubDecoder {
        output: Mutex<DecoderOutput>,
        delay: Duration,
        calls: AtomicUsize,
        seen_paths: Mutex<Vec<PathBuf>>,
    }

    impl StubDecoder {
        fn returning(output: DecoderOutput) -> Arc<Self> {
            Arc::new(Self {
                output: Mutex::new(output),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                seen_paths: Mutex::new(Vec::new()),
            })
        }

        fn slow(output: DecoderOutput, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                output: Mutex::new(output),
                delay,
                calls: AtomicUsize::new(0),
                seen_paths: Mutex::new(Vec::new()),
            })
        }

        fn hello() -> DecoderOutput {
            DecoderOutput {
                text: Some("hello world".to_string()),
                segments: vec![DecoderSegment {
                    start: 0,
                    end: 120,
                    text: "hello world".to_string(),
                }],
                language: Some("en".to_string()),
                error: None,
            }
        }
    }

    #[async_trait]
    impl SpeechDecoder for StubDecoder {
        async fn decode(&self, invocation: DecoderInvocation) -> anyhow::Result<DecoderOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_paths.lock().unwrap().push(invocation.audio_path);
            tokio::time::sleep(self.delay).await;
            Ok(self.output.lock().unwrap().clone())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    struct CopyConverter;

    #[async_trait]
    impl AudioConverter for CopyConverter {
        async fn convert(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
            let data = tokio::fs::read(input).await?;
            pcm::write_wav(output, 16_000, 1, 16, &data)?;
            Ok(())
        }
    }

    struct BrokenConverter;

    #[async_trait]
    impl AudioConverter for BrokenConverter {
        async fn convert(&self, _input: &Path, _output: &Path) -> anyhow::Result<()> {
            anyhow::bail!("codec not supported")
        }
    }

    fn engine_with(
        decoder: Arc<StubDecoder>,
        converter: Arc<dyn AudioConverter>,
        timeout: Duration,
    ) -> TranscriptionEngine {
        TranscriptionEngine::new(decoder, converter, timeout)
    }

    fn write_ready_wav(dir: &Path) -> PathBuf {
        let path = dir.join("clip.wav");
        pcm::write_wav(&path, 16_000, 1, 16, &[0u8; 640]).unwrap();
        path
    }

    #[tokio::test]
    async fn transcribes_ready_audio_without_conversion() {
        let dir = tempdir().unwrap();
        let audio = write_ready_wav(dir.path());
        let decoder = StubDecoder::returning(StubDecoder::hello());
        let engine = engine_with(
            Arc::clone(&decoder),
            Arc::new(BrokenConverter),
            Duration::from_secs(5),
        );

        let request = TranscriptionRequest::new(&audio, "base");
        let result = engine.transcribe(&request, Path::new("model.bin")).await.unwrap();

        assert_eq!(result.text, "hello world");
        assert_eq!(result.language, "en");
        assert_eq!(result.segments.len(), 1);
        assert!(!result.conversion_fallback);
        // Ready-format audio must reach the decoder untouched.
        assert_eq!(decoder.seen_paths.lock().unwrap()[0], audio);
    }

    #[tokio::test]
    async fn converts_non_pcm_audio_first() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("clip.mp3");
        std::fs::write(&audio, b"fake compressed audio").unwrap();
        let decoder = StubDecoder::returning(StubDecoder::hello());
        let engine = engine_with(
            Arc::clone(&decoder),
            Arc::new(CopyConverter),
            Duration::from_secs(5),
        );

        let request = TranscriptionRequest::new(&audio, "base");
        let result = engine.transcribe(&request, Path::new("model.bin")).await.unwrap();

        assert!(!result.conversion_fallback);
        let seen = decoder.seen_paths.lock().unwrap();
        assert_ne!(seen[0], audio);
        // Temp file cleaned up after the decode.
        assert!(!seen[0].exists());
    }

    #[tokio::test]
    async fn conversion_failure_degrades_to_original() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("clip.ogg");
        std::fs::write(&audio, b"fake compressed audio").unwrap();
        let decoder = StubDecoder::returning(StubDecoder::hello());
        let engine = engine_with(
            Arc::clone(&decoder),
            Arc::new(BrokenConverter),
            Duration::from_secs(5),
        );

        let request = TranscriptionRequest::new(&audio, "base");
        let result = engine.transcribe(&request, Path::new("model.bin")).await.unwrap();

        assert!(result.conversion_fallback);
        assert_eq!(decoder.seen_paths.lock().unwrap()[0], audio);
    }

    #[tokio::test]
    async fn missing_audio_is_invalid_input() {
        let engine = engine_with(
            StubDecoder::returning(StubDecoder::hello()),
            Arc::new(BrokenConverter),
            Duration::from_secs(5),
        );
        let request = TranscriptionRequest::new("/nonexistent/clip.wav", "base");
        let err = engine.transcribe(&request, Path::new("model.bin")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_audio_is_invalid_input() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("empty.wav");
        std::fs::write(&audio, b"").unwrap();
        let engine = engine_with(
            StubDecoder::returning(StubDecoder::hello()),
            Arc::new(BrokenConverter),
            Duration::from_secs(5),
        );
        let request = TranscriptionRequest::new(&audio, "base");
        let err = engine.transcribe(&request, Path::new("model.bin")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn slow_decode_times_out() {
        let dir = tempdir().unwrap();
        let audio = write_ready_wav(dir.path());
        let engine = engine_with(
            StubDecoder::slow(StubDecoder::hello(), Duration::from_secs(2)),
            Arc::new(BrokenConverter),
            Duration::from_millis(50),
        );
        let request = TranscriptionRequest::new(&audio, "base");
        let err = engine.transcribe(&request, Path::new("model.bin")).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_text_surfaces_decoder_error() {
        let dir = tempdir().unwrap();
        let audio = write_ready_wav(dir.path());
        let output = DecoderOutput {
            text: None,
            error: Some("beam search collapsed".to_string()),
            ..Default::default()
        };
        let engine = engine_with(
            StubDecoder::returning(output),
            Arc::new(BrokenConverter),
            Duration::from_secs(5),
        );
        let request = TranscriptionRequest::new(&audio, "base");
        let err = engine.transcribe(&request, Path::new("model.bin")).await.unwrap_err();
        match err {
            EngineError::ProcessingFailed(reason) => {
                assert!(reason.contains("beam search collapsed"))
            }
            other => panic!("expected ProcessingFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn formatters_run_in_order() {
        struct Upper;
        impl TextFormatter for Upper {
            fn name(&self) -> &'static str {
                "upper"
            }
            fn format(&self, text: &str) -> String {
                text.to_uppercase()
            }
        }
        struct Exclaim;
        impl TextFormatter for Exclaim {
            fn name(&self) -> &'static str {
                "exclaim"
            }
            fn format(&self, text: &str) -> String {
                format!("{}!", text)
            }
        }

        let dir = tempdir().unwrap();
        let audio = write_ready_wav(dir.path());
        let engine = engine_with(
            StubDecoder::returning(StubDecoder::hello()),
            Arc::new(BrokenConverter),
            Duration::from_secs(5),
        )
        .with_formatters(vec![Arc::new(Upper), Arc::new(Exclaim)]);

        let request = TranscriptionRequest::new(&audio, "base");
        let result = engine.transcribe(&request, Path::new("model.bin")).await.unwrap();
        assert_eq!(result.text, "HELLO WORLD!");
    }

    #[test]
    fn thread_hints_are_clamped() {
        assert_eq!(effective_count(Some(0)), 1);
        assert_eq!(effective_count(Some(64)), 8);
        let derived = effective_count(None);
        assert!((1..=8).contains(&derived));
    }
}
