//! 16-bit PCM quantization
//!
//! The wire format is mono 16-bit little-endian PCM. Encoding quantizes
//! normalized f32 samples; decoding reverses it for playback.

use crate::AudioError;

/// Quantize normalized f32 samples to 16-bit little-endian PCM bytes.
///
/// Samples outside [-1.0, 1.0] are clamped rather than wrapped.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let q = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&q.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM bytes to normalized f32 samples.
///
/// An odd byte count means a truncated or corrupt chunk and is rejected;
/// the playback pipeline drops such chunks and keeps draining.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::Decode(format!(
            "odd byte length {} is not valid 16-bit PCM",
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let s = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.push((s as f32 / 32768.0).clamp(-1.0, 1.0));
    }
    Ok(out)
}
