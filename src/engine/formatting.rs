// engine/formatting.rs
//
// Default text formatter that scrubs the repetition loops and filler
// phrases decoders fall into on near-silent audio.

use super::hooks::TextFormatter;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Stock hallucination phrases that show up on silence or music.
const FILLER_PHRASES: [&str; 9] = [
    "thank you for watching",
    "thanks for watching",
    "like and subscribe",
    "music playing",
    "applause",
    "laughter",
    "um um um",
    "uh uh uh",
    "ah ah ah",
];

/// Collapses consecutive word repeats and back-to-back phrase repeats,
/// and drops outputs that are mostly repetition or known filler entirely.
pub struct RepetitionScrubber {
    /// Transcripts whose repeated-word share exceeds this are discarded.
    max_repetition_ratio: f32,
}

impl RepetitionScrubber {
    pub fn new() -> Self {
        Self {
            max_repetition_ratio: 0.7,
        }
    }

    fn is_filler(text: &str) -> bool {
        let lowered = text.to_lowercase();
        if FILLER_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return true;
        }
        // Long strings drawn from a tiny alphabet are decoder noise.
        let distinct: HashSet<char> = text.chars().collect();
        distinct.len() <= 3 && text.len() > 10
    }

    fn collapse_word_repeats<'a>(words: &[&'a str]) -> Vec<&'a str> {
        let mut out: Vec<&str> = Vec::with_capacity(words.len());
        for &word in words {
            if out.last() != Some(&word) {
                out.push(word);
            }
        }
        out
    }

    /// Drops the second copy of any immediately repeated 2..=5 word
    /// phrase.
    fn collapse_phrase_repeats<'a>(words: &[&'a str]) -> Vec<&'a str> {
        if words.len() < 4 {
            return words.to_vec();
        }

        let mut out = Vec::with_capacity(words.len());
        let mut i = 0;
        while i < words.len() {
            let mut matched = false;
            for len in 2..=5usize.min((words.len() - i) / 2) {
                let (first, second) = (&words[i..i + len], &words[i + len..i + 2 * len]);
                if first == second {
                    out.extend_from_slice(first);
                    i += 2 * len;
                    matched = true;
                    break;
                }
            }
            if !matched {
                out.push(words[i]);
                i += 1;
            }
        }
        out
    }

    fn repetition_ratio(words: &[&str]) -> f32 {
        if words.len() < 4 {
            return 0.0;
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in words {
            *counts.entry(word.to_lowercase()).or_insert(0) += 1;
        }
        let repeated: usize = counts.values().map(|&n| n.saturating_sub(1)).sum();
        repeated as f32 / words.len() as f32
    }
}

impl Default for RepetitionScrubber {
    fn default() -> Self {
        Self::new()
    }
}

impl TextFormatter for RepetitionScrubber {
    fn name(&self) -> &'static str {
        "repetition-scrubber"
    }

    fn format(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        if Self::is_filler(text) {
            debug!("discarding filler transcript: '{}'", text);
            return String::new();
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() < 3 {
            return text.to_string();
        }

        let words = Self::collapse_word_repeats(&words);
        let words = Self::collapse_phrase_repeats(&words);

        if Self::repetition_ratio(&words) > self.max_repetition_ratio {
            debug!("discarding transcript with repetition ratio > {}", self.max_repetition_ratio);
            return String::new();
        }

        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrub(text: &str) -> String {
        RepetitionScrubber::new().format(text)
    }

    #[test]
    fn passes_clean_text_through() {
        assert_eq!(
            scrub("the quick brown fox jumps over the lazy dog"),
            "the quick brown fox jumps over the lazy dog"
        );
    }

    #[test]
    fn collapses_word_repeats() {
        assert_eq!(scrub("hello hello hello there friend"), "hello there friend");
    }

    #[test]
    fn collapses_phrase_repeats() {
        assert_eq!(
            scrub("see you later see you later everyone else stayed"),
            "see you later everyone else stayed"
        );
    }

    #[test]
    fn drops_filler_phrases() {
        assert_eq!(scrub("Thanks for watching and see you next time"), "");
    }

    #[test]
    fn drops_mostly_repetitive_output() {
        // Aperiodic enough to survive the collapse passes, but 8 of 11
        // words are repeats.
        assert_eq!(scrub("ja nee so ja so nee ja nee so ja so"), "");
    }

    #[test]
    fn short_text_untouched() {
        assert_eq!(scrub("ok ok"), "ok ok");
    }
}
