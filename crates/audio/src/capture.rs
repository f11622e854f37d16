//! Capture pipeline
//!
//! Pulls fixed windows from the microphone, downmixes and resamples to
//! the wire rate, quantizes each window independently to 16-bit PCM, and
//! forwards frames to a sink in strict production order. Muted windows
//! are still produced and discarded, so frame timing never desyncs and
//! unmuting is instantaneous.
//!
//! The cpal stream lives on a dedicated thread because streams are not
//! `Send`; the thread parks until `stop()` hangs up the shutdown channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::mpsc;

use crate::{encode_pcm16, frame_samples, resample_linear, AudioError, FRAME_MS, SOURCE_SAMPLE_RATE};

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name; `None` selects the system default
    pub device: Option<String>,
    /// Window length in milliseconds
    pub frame_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            frame_ms: FRAME_MS,
        }
    }
}

/// Accumulates samples at the wire rate and emits encoded fixed windows.
///
/// Pure buffering and quantization, split out so framing behavior is
/// testable without a device.
#[derive(Debug)]
pub struct FrameChunker {
    buf: Vec<f32>,
    frame_samples: usize,
}

impl FrameChunker {
    pub fn new(frame_ms: u32) -> Self {
        Self {
            buf: Vec::new(),
            frame_samples: frame_samples(frame_ms),
        }
    }

    /// Append samples; returns every completed window, encoded, in
    /// production order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buf.len() >= self.frame_samples {
            let window: Vec<f32> = self.buf.drain(..self.frame_samples).collect();
            frames.push(encode_pcm16(&window));
        }
        frames
    }

    /// Samples buffered toward the next window
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Per-callback state shared with the cpal input thread
struct CaptureWorker {
    chunker: FrameChunker,
    device_rate: u32,
    channels: u16,
    muted: Arc<AtomicBool>,
    frames_produced: Arc<AtomicU64>,
    sink: mpsc::UnboundedSender<Vec<u8>>,
}

impl CaptureWorker {
    fn process(&mut self, data: &[f32]) {
        let mono = downmix(data, self.channels);
        let resampled = resample_linear(&mono, self.device_rate, SOURCE_SAMPLE_RATE);

        for frame in self.chunker.push(&resampled) {
            // Window production is invariant to mute state; only the
            // forwarding decision changes.
            self.frames_produced.fetch_add(1, Ordering::Relaxed);
            if self.muted.load(Ordering::Relaxed) {
                continue;
            }
            if self.sink.send(frame).is_err() {
                // Receiver gone; the session is tearing down.
                return;
            }
        }
    }
}

fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Microphone capture pipeline
pub struct CapturePipeline {
    muted: Arc<AtomicBool>,
    frames_produced: Arc<AtomicU64>,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CapturePipeline {
    /// Acquire the microphone and start producing frames into `sink`.
    ///
    /// `muted` is owned by the caller so the gate survives pipeline
    /// restarts. Blocks until the device is acquired or acquisition
    /// fails; device failures surface as [`AudioError::Device`],
    /// distinguishable from transport errors.
    pub fn start(
        config: &CaptureConfig,
        sink: mpsc::UnboundedSender<Vec<u8>>,
        muted: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let frames_produced = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), AudioError>>(1);

        let worker_muted = Arc::clone(&muted);
        let worker_frames = Arc::clone(&frames_produced);
        let config = config.clone();

        let thread = std::thread::Builder::new()
            .name("voice-call-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(&config, sink, worker_muted, worker_frames) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop() hangs up; the stream object must stay
                // alive on this thread for capture to continue.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Device(format!("capture thread spawn failed: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::Device("capture thread exited during setup".into()))??;

        tracing::debug!("capture started");
        Ok(Self {
            muted,
            frames_produced,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Gate frame forwarding. Windows keep being produced while muted.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Windows produced since start, muted or not
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    /// Release the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            drop(tx);
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
            tracing::debug!(frames = self.frames_produced(), "capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    config: &CaptureConfig,
    sink: mpsc::UnboundedSender<Vec<u8>>,
    muted: Arc<AtomicBool>,
    frames_produced: Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();

    let device = match &config.device {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| AudioError::Device(format!("input device '{name}' not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::Device("no default input device".into()))?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let stream_config: cpal::StreamConfig = supported.config();

    let mut worker = CaptureWorker {
        chunker: FrameChunker::new(config.frame_ms),
        device_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
        muted,
        frames_produced,
        sink,
    };

    let err_fn = |e: cpal::StreamError| tracing::warn!("capture stream error: {e}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| worker.process(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    worker.process(&samples);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?,
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "input sample format {other:?}"
            )))
        }
    };

    stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_worker(
        frame_ms: u32,
    ) -> (
        CaptureWorker,
        mpsc::UnboundedReceiver<Vec<u8>>,
        Arc<AtomicBool>,
        Arc<AtomicU64>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let muted = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));
        let worker = CaptureWorker {
            chunker: FrameChunker::new(frame_ms),
            device_rate: SOURCE_SAMPLE_RATE,
            channels: 1,
            muted: Arc::clone(&muted),
            frames_produced: Arc::clone(&frames),
            sink: tx,
        };
        (worker, rx, muted, frames)
    }

    #[test]
    fn test_chunker_emits_fixed_windows_in_order() {
        let mut chunker = FrameChunker::new(256);
        let window = frame_samples(256);

        // Half a window: nothing yet.
        assert!(chunker.push(&vec![0.25; window / 2]).is_empty());
        assert_eq!(chunker.pending(), window / 2);

        // One and a half more: two complete windows come out together.
        let frames = chunker.push(&vec![0.25; window + window / 2]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == window * 2));
        assert_eq!(chunker.pending(), window / 2);
    }

    #[test]
    fn test_mute_discards_but_keeps_producing() {
        let (mut worker, mut rx, muted, frames) = test_worker(256);
        let window = frame_samples(256);

        muted.store(true, Ordering::Relaxed);
        worker.process(&vec![0.1; window * 3]);
        assert_eq!(frames.load(Ordering::Relaxed), 3);
        assert!(rx.try_recv().is_err());

        // Unmute: the very next completed window is forwarded, so the
        // outbound gap is bounded by one frame duration.
        muted.store(false, Ordering::Relaxed);
        worker.process(&vec![0.1; window]);
        assert_eq!(frames.load(Ordering::Relaxed), 4);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_worker_resamples_device_rate() {
        let (mut worker, mut rx, _muted, _frames) = test_worker(256);
        worker.device_rate = 48_000;

        // 3x the wire rate: three device windows make one wire window.
        let window = frame_samples(256);
        worker.process(&vec![0.1; window * 3]);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), window * 2);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }
}
