//! Audio pipelines for the duplex voice-call engine
//!
//! Two halves, both running against the remote agent's fixed wire format
//! of mono 16-bit little-endian PCM at 16 kHz:
//!
//! - capture: microphone -> fixed windows -> quantized frames -> sink
//! - playback: inbound chunks -> jitter buffer -> gap-free scheduling -> speaker

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use capture::{CaptureConfig, CapturePipeline, FrameChunker};
pub use pcm::{decode_pcm16, encode_pcm16};
pub use playback::{AudioClock, PlaybackPipeline, WallClock};
pub use resample::resample_linear;

use thiserror::Error;

/// Sample rate of the wire format, both directions
pub const SOURCE_SAMPLE_RATE: u32 = 16_000;

/// Capture window length
pub const FRAME_MS: u32 = 256;

/// Samples per capture window at the wire rate
pub const fn frame_samples(frame_ms: u32) -> usize {
    (SOURCE_SAMPLE_RATE as usize * frame_ms as usize) / 1000
}

/// Audio pipeline errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Device acquisition failed: missing, busy, or permission denied.
    /// Kept distinct from transport errors so callers can tell them apart.
    #[error("Audio device unavailable or permission denied: {0}")]
    Device(String),

    #[error("Unsupported device format: {0}")]
    UnsupportedFormat(String),

    /// One inbound chunk failed to decode
    #[error("PCM decode error: {0}")]
    Decode(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<AudioError> for voice_call_core::Error {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Decode(msg) => voice_call_core::Error::Playback(msg),
            AudioError::Device(msg) | AudioError::UnsupportedFormat(msg) | AudioError::Stream(msg) => {
                voice_call_core::Error::Device(msg)
            }
        }
    }
}
