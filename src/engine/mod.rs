// engine/mod.rs
//
// Decoder adaptation: collaborator traits, format sniffing, extension
// hooks, and the TranscriptionEngine that ties them together.

mod decoder;
mod engine;
mod formatting;
mod hooks;
pub(crate) mod pcm;

pub use decoder::{
    AudioConverter, DecoderInvocation, DecoderOutput, DecoderSegment, SpeechDecoder,
};
pub use engine::{Segment, TranscriptionEngine, TranscriptionRequest, TranscriptionResult};
pub use formatting::RepetitionScrubber;
pub use hooks::{AudioPreprocessor, ResultPostprocessor, TextFormatter};
