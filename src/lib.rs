//! Local speech-to-text job pipeline.
//!
//! voxpipe turns audio files into transcripts using on-device whisper.cpp
//! style models. It manages the model files (download, integrity checks,
//! concurrent-download dedup), normalizes audio for the decoder, caches
//! results by content fingerprint, and schedules jobs through a bounded
//! priority queue.
//!
//! The actual decoder and audio converter are injected behind the
//! [`SpeechDecoder`] and [`AudioConverter`] traits, so the pipeline itself
//! stays free of native bindings.
//!
//! ```no_run
//! use std::sync::Arc;
//! use voxpipe::{
//!     JobQueue, PipelineConfig, ReqwestFetcher, ResultCache, ModelStore,
//!     TranscriptionEngine, TranscriptionRequest,
//! };
//! # use voxpipe::{AudioConverter, SpeechDecoder};
//! # async fn run(decoder: Arc<dyn SpeechDecoder>, converter: Arc<dyn AudioConverter>) {
//! let config = PipelineConfig::default();
//! let engine = Arc::new(TranscriptionEngine::new(
//!     decoder,
//!     converter,
//!     config.decode_timeout,
//! ));
//! let models = Arc::new(ModelStore::new(
//!     config.model_store.clone(),
//!     Arc::new(ReqwestFetcher::new()),
//! ));
//! let cache = Arc::new(ResultCache::new(config.cache.clone()));
//! let queue = JobQueue::new(config.queue, engine, models, cache, voxpipe::catalog());
//!
//! let id = queue
//!     .submit(TranscriptionRequest::new("meeting.wav", "base"))
//!     .await;
//! # let _ = id;
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;

pub use cache::{fingerprint_request, CacheEntry, Fingerprint, ResultCache};
pub use config::{CacheConfig, ModelStoreConfig, PipelineConfig, QueueConfig};
pub use engine::{
    AudioConverter, AudioPreprocessor, DecoderInvocation, DecoderOutput, DecoderSegment,
    RepetitionScrubber, ResultPostprocessor, Segment, SpeechDecoder, TextFormatter,
    TranscriptionEngine, TranscriptionRequest, TranscriptionResult,
};
pub use error::{CacheError, EngineError, ModelError, QueueError};
pub use model::{
    catalog, DownloadState, FetchedStream, ModelDescriptor, ModelFetcher, ModelStore, ProgressFn,
    ReqwestFetcher,
};
pub use queue::{JobEvent, JobId, JobQueue, JobRecord, JobStatus, Priority};
