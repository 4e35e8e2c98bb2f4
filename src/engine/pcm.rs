// engine/pcm.rs
//
// Minimal RIFF/WAVE header inspection, just enough to decide whether a
// file is already in the format the decoder requires. Anything that does
// not parse as a 16kHz/mono/s16 PCM WAV goes to the conversion
// collaborator.

use std::io::Read;
use std::path::Path;

pub const REQUIRED_SAMPLE_RATE: u32 = 16_000;
pub const REQUIRED_CHANNELS: u16 = 1;
pub const REQUIRED_BITS: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavSpec {
    pub fn is_decoder_ready(&self) -> bool {
        self.format == 1 // PCM
            && self.channels == REQUIRED_CHANNELS
            && self.sample_rate == REQUIRED_SAMPLE_RATE
            && self.bits_per_sample == REQUIRED_BITS
    }
}

/// True if the file already matches the decoder's required PCM format.
/// Unreadable or non-WAV input simply reports false; the converter deals
/// with it.
pub fn is_decoder_ready(path: &Path) -> bool {
    sniff_wav(path).map(|spec| spec.is_decoder_ready()).unwrap_or(false)
}

/// Parse the fmt chunk out of a RIFF/WAVE header. Walks the chunk list
/// rather than assuming the canonical 44-byte layout; some encoders put
/// LIST chunks ahead of fmt.
pub fn sniff_wav(path: &Path) -> Option<WavSpec> {
    let mut header = [0u8; 1024];
    let mut file = std::fs::File::open(path).ok()?;
    let read = file.read(&mut header).ok()?;
    let header = &header[..read];

    if read < 12 || &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }

    let mut offset = 12;
    while offset + 8 <= header.len() {
        let chunk_id = &header[offset..offset + 4];
        let chunk_size =
            u32::from_le_bytes(header[offset + 4..offset + 8].try_into().ok()?) as usize;

        if chunk_id == b"fmt " {
            let body = header.get(offset + 8..offset + 8 + chunk_size.min(16))?;
            if body.len() < 16 {
                return None;
            }
            return Some(WavSpec {
                format: u16::from_le_bytes([body[0], body[1]]),
                channels: u16::from_le_bytes([body[2], body[3]]),
                sample_rate: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                bits_per_sample: u16::from_le_bytes([body[14], body[15]]),
            });
        }

        // Chunks are word-aligned.
        offset += 8 + chunk_size + (chunk_size & 1);
    }

    None
}

/// Write a minimal PCM WAV file. Used by tests and available to converter
/// impls that produce raw samples.
pub fn write_wav(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data: &[u8],
) -> std::io::Result<()> {
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;

    let mut out = Vec::with_capacity(44 + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);

    std::fs::write(path, out)
}
