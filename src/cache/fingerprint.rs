// cache/fingerprint.rs
//
// A fingerprint identifies one transcription outcome: the audio bytes plus
// every request field that changes what the decoder produces. Priority and
// thread hints are deliberately excluded; they affect scheduling, not output.

use crate::engine::TranscriptionRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 over the audio content and decode parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint for a request whose audio bytes were already read.
pub fn fingerprint_request(audio: &[u8], request: &TranscriptionRequest) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(audio);
    hasher.update(b"\0model:");
    hasher.update(request.model.as_bytes());
    hasher.update(b"\0lang:");
    hasher.update(request.language.as_deref().unwrap_or("auto").as_bytes());
    hasher.update(b"\0flags:");
    hasher.update([
        request.translate as u8,
        request.timestamps as u8,
        request.split_on_word as u8,
    ]);
    Fingerprint(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Priority;

    fn request() -> TranscriptionRequest {
        TranscriptionRequest::new("/tmp/clip.wav", "base")
    }

    #[test]
    fn identical_inputs_agree() {
        let a = fingerprint_request(b"audio bytes", &request());
        let b = fingerprint_request(b"audio bytes", &request());
        assert_eq!(a, b);
    }

    #[test]
    fn audio_content_changes_fingerprint() {
        let a = fingerprint_request(b"audio bytes", &request());
        let b = fingerprint_request(b"other bytes", &request());
        assert_ne!(a, b);
    }

    #[test]
    fn decode_parameters_change_fingerprint() {
        let base = fingerprint_request(b"audio", &request());

        let mut other_model = request();
        other_model.model = "large-v3".to_string();
        assert_ne!(base, fingerprint_request(b"audio", &other_model));

        let mut other_lang = request();
        other_lang.language = Some("de".to_string());
        assert_ne!(base, fingerprint_request(b"audio", &other_lang));

        let mut translated = request();
        translated.translate = true;
        assert_ne!(base, fingerprint_request(b"audio", &translated));

        let mut split = request();
        split.split_on_word = true;
        assert_ne!(base, fingerprint_request(b"audio", &split));
    }

    #[test]
    fn scheduling_parameters_do_not_change_fingerprint() {
        let base = fingerprint_request(b"audio", &request());

        let mut high = request();
        high.priority = Priority::High;
        high.threads = Some(2);
        high.processors = Some(2);
        assert_eq!(base, fingerprint_request(b"audio", &high));
    }

    #[test]
    fn explicit_auto_matches_unset_language() {
        let unset = fingerprint_request(b"audio", &request());
        let mut auto = request();
        auto.language = Some("auto".to_string());
        assert_eq!(unset, fingerprint_request(b"audio", &auto));
    }
}
