//! Playback pipeline: jitter buffer + scheduler
//!
//! Inbound PCM chunks arrive with irregular timing. Playing each at
//! arrival overlaps on bursts; playing purely at the cursor can schedule
//! into the past after a silence. Each chunk is therefore scheduled at
//! `max(clock_now, next_play_time)` and the cursor advances by the
//! chunk's duration, which yields gap-free, overlap-free output.
//!
//! A single consumer task drains the queue, serializing all access to the
//! cursor. Barge-in clears the queue but leaves the cursor untouched, so
//! the next enqueue resyncs to "now"; audio already handed to the device
//! may finish playing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{decode_pcm16, resample_linear, AudioError, SOURCE_SAMPLE_RATE};

/// Monotonic playback clock, seconds since some fixed origin
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Instant-backed clock used outside tests
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for WallClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Pick the start time for the next chunk.
///
/// Never before the clock's current reading, never before the previous
/// chunk's scheduled end.
pub(crate) fn schedule(clock_now: f64, cursor: f64) -> f64 {
    if cursor > clock_now {
        cursor
    } else {
        clock_now
    }
}

/// Chunk duration in seconds at the wire rate
pub(crate) fn chunk_duration(sample_count: usize) -> f64 {
    sample_count as f64 / SOURCE_SAMPLE_RATE as f64
}

struct JitterState {
    queue: VecDeque<Vec<u8>>,
    draining: bool,
}

/// Playback pipeline: jitter buffer, drain task, optional output device
pub struct PlaybackPipeline {
    state: Arc<Mutex<JitterState>>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    chunks_played: Arc<AtomicU64>,
    ring: Arc<Mutex<VecDeque<f32>>>,
    task: Option<tokio::task::JoinHandle<()>>,
    output_shutdown: Option<std::sync::mpsc::Sender<()>>,
    output_thread: Option<std::thread::JoinHandle<()>>,
}

impl PlaybackPipeline {
    /// Pipeline without an output device; scheduled samples land in the
    /// internal ring. Used in tests and by callers that do their own
    /// rendering.
    pub fn simple(clock: Arc<dyn AudioClock>) -> Self {
        let ring = Arc::new(Mutex::new(VecDeque::new()));
        Self::build(clock, SOURCE_SAMPLE_RATE, ring)
    }

    /// Pipeline rendering to the default output device.
    ///
    /// Must be called from within a tokio runtime; the drain loop is a
    /// spawned task. The cpal stream lives on its own thread because
    /// streams are not `Send`.
    pub fn with_output_device(clock: Arc<dyn AudioClock>) -> Result<Self, AudioError> {
        let ring: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<u32, AudioError>>(1);

        let thread_ring = Arc::clone(&ring);
        let thread = std::thread::Builder::new()
            .name("voice-call-playback".into())
            .spawn(move || {
                let stream = match build_output_stream(thread_ring) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Device(format!("playback thread spawn failed: {e}")))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("playback thread exited during setup".into()))??;

        let mut pipeline = Self::build(clock, device_rate, ring);
        pipeline.output_shutdown = Some(shutdown_tx);
        pipeline.output_thread = Some(thread);
        Ok(pipeline)
    }

    fn build(clock: Arc<dyn AudioClock>, device_rate: u32, ring: Arc<Mutex<VecDeque<f32>>>) -> Self {
        let state = Arc::new(Mutex::new(JitterState {
            queue: VecDeque::new(),
            draining: false,
        }));
        let notify = Arc::new(Notify::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let chunks_played = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(drain_loop(
            Arc::clone(&state),
            Arc::clone(&notify),
            Arc::clone(&shutdown),
            Arc::clone(&chunks_played),
            Arc::clone(&ring),
            clock,
            device_rate,
        ));

        Self {
            state,
            notify,
            shutdown,
            chunks_played,
            ring,
            task: Some(task),
            output_shutdown: None,
            output_thread: None,
        }
    }

    /// Append a chunk in arrival order and wake the drain task if idle.
    pub fn enqueue(&self, chunk: Vec<u8>) {
        {
            let mut state = self.state.lock();
            state.queue.push_back(chunk);
            state.draining = true;
        }
        self.notify.notify_one();
    }

    /// Barge-in: discard everything queued and flush samples not yet
    /// handed to the device. The cursor is left untouched so the next
    /// enqueue resyncs to "now"; the device buffer in flight may finish.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.state.lock();
            let n = state.queue.len();
            state.queue.clear();
            n
        };
        self.ring.lock().clear();
        if dropped > 0 {
            tracing::debug!(dropped, "playback queue cleared on interruption");
        }
    }

    /// Draining or queue non-empty
    pub fn is_speaking(&self) -> bool {
        let state = self.state.lock();
        state.draining || !state.queue.is_empty()
    }

    /// Chunks decoded and scheduled since start
    pub fn chunks_played(&self) -> u64 {
        self.chunks_played.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn ring_len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Stop the drain task and release the renderer. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(tx) = self.output_shutdown.take() {
            drop(tx);
            if let Some(handle) = self.output_thread.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drain_loop(
    state: Arc<Mutex<JitterState>>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    chunks_played: Arc<AtomicU64>,
    ring: Arc<Mutex<VecDeque<f32>>>,
    clock: Arc<dyn AudioClock>,
    device_rate: u32,
) {
    let mut next_play_time: f64 = 0.0;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let chunk = {
            let mut st = state.lock();
            match st.queue.pop_front() {
                Some(chunk) => Some(chunk),
                None => {
                    st.draining = false;
                    None
                }
            }
        };

        let Some(chunk) = chunk else {
            notify.notified().await;
            continue;
        };

        // One corrupt frame must not silence the call: drop and continue.
        let samples = match decode_pcm16(&chunk) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!("dropping undecodable chunk: {e}");
                continue;
            }
        };
        if samples.is_empty() {
            continue;
        }

        let duration = chunk_duration(samples.len());
        let start = schedule(clock.now(), next_play_time);

        let wait = start - clock.now();
        if wait > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }

        let rendered = resample_linear(&samples, SOURCE_SAMPLE_RATE, device_rate);
        ring.lock().extend(rendered);

        next_play_time = start + duration;
        chunks_played.fetch_add(1, Ordering::Relaxed);
    }
}

fn build_output_stream(
    ring: Arc<Mutex<VecDeque<f32>>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("no default output device".into()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let stream_config: cpal::StreamConfig = supported.config();
    let channels = stream_config.channels as usize;
    let rate = stream_config.sample_rate.0;

    let err_fn = |e: cpal::StreamError| tracing::warn!("playback stream error: {e}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut ring = ring.lock();
                    for frame in data.chunks_mut(channels) {
                        // Underrun renders silence rather than stalling.
                        let s = ring.pop_front().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = s;
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?,
        SampleFormat::I16 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut ring = ring.lock();
                    for frame in data.chunks_mut(channels) {
                        let s = ring.pop_front().unwrap_or(0.0);
                        let q = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                        for out in frame.iter_mut() {
                            *out = q;
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::Device(e.to_string()))?,
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "output sample format {other:?}"
            )))
        }
    };

    stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
    Ok((stream, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_pcm16;

    struct MockClock {
        now: Mutex<f64>,
    }

    impl MockClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(0.0),
            })
        }

        fn advance(&self, secs: f64) {
            *self.now.lock() += secs;
        }
    }

    impl AudioClock for MockClock {
        fn now(&self) -> f64 {
            *self.now.lock()
        }
    }

    fn tone_chunk(samples: usize) -> Vec<u8> {
        let tone: Vec<f32> = (0..samples).map(|i| (i as f32 * 0.2).sin() * 0.5).collect();
        encode_pcm16(&tone)
    }

    async fn wait_idle(pipeline: &PlaybackPipeline) {
        for _ in 0..1000 {
            if !pipeline.is_speaking() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("pipeline never went idle");
    }

    #[test]
    fn test_schedule_never_overlaps_and_never_in_past() {
        // Bursty arrival: three chunks of 0.5 s all arriving at t=0.
        let mut cursor = 0.0;
        let mut prev_end = 0.0;
        for _ in 0..3 {
            let start = schedule(0.0, cursor);
            assert!(start >= 0.0);
            assert!(start >= prev_end);
            prev_end = start + 0.5;
            cursor = prev_end;
        }
        assert_eq!(cursor, 1.5);

        // After a silence the clock has moved past the cursor; the next
        // chunk starts at "now", not in the past.
        let start = schedule(10.0, cursor);
        assert_eq!(start, 10.0);
    }

    #[test]
    fn test_chunk_duration() {
        assert_eq!(chunk_duration(16_000), 1.0);
        assert_eq!(chunk_duration(4_096), 4_096.0 / 16_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_plays_and_goes_idle() {
        let clock = MockClock::new();
        let mut pipeline = PlaybackPipeline::simple(clock.clone());

        pipeline.enqueue(tone_chunk(1600));
        pipeline.enqueue(tone_chunk(1600));
        assert!(pipeline.is_speaking());

        wait_idle(&pipeline).await;
        assert_eq!(pipeline.chunks_played(), 2);
        assert_eq!(pipeline.ring_len(), 3200);
        pipeline.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_chunk_dropped_without_stalling() {
        let clock = MockClock::new();
        let mut pipeline = PlaybackPipeline::simple(clock.clone());

        pipeline.enqueue(vec![0x01, 0x02, 0x03]); // odd length, undecodable
        pipeline.enqueue(tone_chunk(800));

        wait_idle(&pipeline).await;
        assert_eq!(pipeline.chunks_played(), 1);
        assert_eq!(pipeline.ring_len(), 800);
        pipeline.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_queue() {
        let clock = MockClock::new();
        let mut pipeline = PlaybackPipeline::simple(clock.clone());

        for _ in 0..10 {
            pipeline.enqueue(tone_chunk(16_000));
        }
        pipeline.clear();

        wait_idle(&pipeline).await;
        // At most what had already been popped got played.
        assert!(pipeline.chunks_played() <= 1);
        pipeline.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let clock = MockClock::new();
        let mut pipeline = PlaybackPipeline::simple(clock.clone());
        pipeline.stop();
        pipeline.stop();
    }
}
