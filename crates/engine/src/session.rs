//! Conversation session
//!
//! One `ConversationSession` is one connection attempt: compose the
//! prompt, resolve the transport, acquire audio, run the full-duplex
//! loop, tear down. The state machine is strictly
//! disconnected -> connecting -> connected -> disconnected; teardown is
//! idempotent and safe from any state, including before connect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use voice_call_audio::{
    AudioClock, CaptureConfig, CapturePipeline, PlaybackPipeline, WallClock,
};
use voice_call_core::{
    ConnectionState, Error, Result, ScenarioDescriptor, TranscriptEntry, VariableBag,
};
use voice_call_transport::{
    create_transport, ClientMessage, ConnectionMode, ConversationTransport,
};

use crate::compositor::compose;
use crate::router::{MessageRouter, RouterOutcome};
use crate::settings::Settings;

/// Events broadcast to session observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake completed; the session id is now known
    Connected { conversation_id: String },
    /// One time-labeled utterance, agent or user
    Transcript(TranscriptEntry),
    /// The session reported a fatal error; a `Disconnected` follows
    Error(String),
    /// Terminal. Emitted exactly once per attempt that left `Disconnected`.
    Disconnected { reason: Option<String> },
}

/// Where captured audio frames come from
pub enum FrameSource {
    /// System default microphone
    DefaultDevice,
    /// Named input device
    Device(String),
    /// Caller-supplied frames, already encoded at the wire format.
    /// Used by tests and headless embeddings.
    Channel(mpsc::UnboundedReceiver<Vec<u8>>),
}

/// Everything one attempt needs, supplied up front
pub struct SessionConfig {
    pub mode: ConnectionMode,
    pub agent_id: Option<String>,
    pub scenario: ScenarioDescriptor,
    pub variables: VariableBag,
    pub frame_source: FrameSource,
    /// Render inbound audio to the default output device. Off, scheduled
    /// samples accumulate in the pipeline's internal ring instead.
    pub render_output: bool,
    pub settings: Settings,
}

impl SessionConfig {
    pub fn new(mode: ConnectionMode, scenario: ScenarioDescriptor) -> Self {
        Self {
            mode,
            agent_id: None,
            scenario,
            variables: VariableBag::new(),
            frame_source: FrameSource::DefaultDevice,
            render_output: true,
            settings: Settings::default(),
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_variables(mut self, variables: VariableBag) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_frame_source(mut self, source: FrameSource) -> Self {
        self.frame_source = source;
        self
    }

    pub fn with_render_output(mut self, render: bool) -> Self {
        self.render_output = render;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Default)]
struct Resources {
    capture: Option<CapturePipeline>,
    playback: Option<Arc<Mutex<PlaybackPipeline>>>,
}

/// Shared handle for everything teardown touches, so the run loop and
/// the caller-facing API tear down the same way.
#[derive(Clone)]
struct SessionCore {
    state: Arc<RwLock<ConnectionState>>,
    resources: Arc<Mutex<Resources>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCore {
    /// Stop audio, drop the transport-side state, emit terminal events.
    /// Idempotent; only the transition out of a live state emits.
    fn teardown(&self, reason: Option<String>, error: Option<Error>) {
        let was = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };

        {
            let mut resources = self.resources.lock();
            if let Some(mut capture) = resources.capture.take() {
                tracing::debug!(frames_out = capture.frames_produced(), "releasing capture");
                capture.stop();
            }
            if let Some(playback) = resources.playback.take() {
                let mut playback = playback.lock();
                tracing::debug!(chunks_in = playback.chunks_played(), "releasing playback");
                playback.stop();
            }
        }

        if was != ConnectionState::Disconnected {
            if let Some(err) = error {
                let _ = self.events.send(SessionEvent::Error(err.to_string()));
            }
            info!(?reason, "session disconnected");
            let _ = self.events.send(SessionEvent::Disconnected { reason });
        }
    }
}

/// One duplex voice conversation with a remote agent
pub struct ConversationSession {
    core: SessionCore,
    conversation_id: Arc<Mutex<Option<String>>>,
    muted: Arc<AtomicBool>,
    config: Mutex<Option<SessionConfig>>,
    transport_override: Mutex<Option<Box<dyn ConversationTransport>>>,
    run: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ConversationSession {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);
        Self {
            core: SessionCore {
                state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
                resources: Arc::new(Mutex::new(Resources::default())),
                events,
            },
            conversation_id: Arc::new(Mutex::new(None)),
            muted: Arc::new(AtomicBool::new(false)),
            config: Mutex::new(Some(config)),
            transport_override: Mutex::new(None),
            run: Mutex::new(None),
            shutdown,
        }
    }

    /// Session driven by a caller-supplied transport instead of the
    /// built-in WebSocket ones. Used by tests and custom embeddings.
    pub fn with_transport(config: SessionConfig, transport: Box<dyn ConversationTransport>) -> Self {
        let session = Self::new(config);
        *session.transport_override.lock() = Some(transport);
        session
    }

    /// Subscribe to session events. Late subscribers miss earlier events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.core.state.read()
    }

    /// Session id assigned by the remote at handshake
    pub fn conversation_id(&self) -> Option<String> {
        self.conversation_id.lock().clone()
    }

    /// Gate outbound audio. Capture keeps running while muted.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Whether inbound audio is queued or draining
    pub fn is_speaking(&self) -> bool {
        self.core
            .resources
            .lock()
            .playback
            .as_ref()
            .map(|p| p.lock().is_speaking())
            .unwrap_or(false)
    }

    /// Connect and run the handshake. Resolves with the conversation id
    /// once the remote's first structured message lands.
    ///
    /// A session is a single attempt: calling `connect` on anything but
    /// a fresh session is a caller error.
    pub async fn connect(&self) -> Result<String> {
        {
            let mut state = self.core.state.write();
            if *state != ConnectionState::Disconnected {
                return Err(Error::Config(format!(
                    "connect called while {}",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        let config = self.config.lock().take();
        let Some(config) = config else {
            self.core.teardown(None, None);
            return Err(Error::Config("session already used; create a new one".into()));
        };

        let attempt_id = Uuid::new_v4();
        let span = tracing::info_span!("session", attempt = %attempt_id);

        match self.connect_inner(config).instrument(span).await {
            Ok(conversation_id) => Ok(conversation_id),
            Err(e) => {
                // The run loop may already be holding the transport;
                // stop it before releasing devices.
                let _ = self.shutdown.send(true);
                if let Some(handle) = self.run.lock().take() {
                    handle.abort();
                }
                self.core.teardown(Some(e.to_string()), None);
                Err(e)
            }
        }
    }

    async fn connect_inner(&self, config: SessionConfig) -> Result<String> {
        let composed = compose(&config.scenario, &config.variables);
        let settings = &config.settings;

        let mut transport = match self.transport_override.lock().take() {
            Some(t) => t,
            None => create_transport(
                config.mode,
                config.agent_id.as_deref(),
                &settings.endpoint,
                Duration::from_secs(settings.connect_timeout_secs),
            )?,
        };

        // One deadline covers connect + handshake when the transport
        // must detect handshake completion itself.
        let deadline = transport
            .connect_timeout()
            .map(|bound| tokio::time::Instant::now() + bound);

        // Audio first: a missing microphone should fail the attempt
        // before any connection is opened, as a device error.
        let (frames, gate_mute) = self.acquire_capture(config.frame_source, settings)?;

        let clock: Arc<dyn AudioClock> = Arc::new(WallClock::new());
        let playback = if config.render_output {
            PlaybackPipeline::with_output_device(Arc::clone(&clock))
                .map_err(voice_call_core::Error::from)?
        } else {
            PlaybackPipeline::simple(Arc::clone(&clock))
        };
        let playback = Arc::new(Mutex::new(playback));
        self.core.resources.lock().playback = Some(Arc::clone(&playback));

        let session_config = if transport.sends_session_config() {
            Some(ClientMessage::session_config(
                composed.prompt,
                composed.first_message,
                composed.voice_id,
                composed.variables,
            ))
        } else {
            None
        };

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let router = MessageRouter::new(
            playback,
            Arc::clone(&self.core.state),
            self.core.events.clone(),
            clock,
            session_config,
            handshake_tx,
        );

        let connect = transport.connect();
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, connect)
                .await
                .map_err(|_| Error::Transport("connect timed out".into()))?,
            None => connect.await,
        }?;

        let run = run_loop(
            transport,
            frames,
            router,
            self.shutdown.subscribe(),
            self.core.clone(),
            gate_mute,
            Arc::clone(&self.muted),
        );
        *self.run.lock() = Some(tokio::spawn(run.in_current_span()));

        let conversation_id = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, handshake_rx)
                .await
                .map_err(|_| Error::Transport("handshake timed out".into()))?,
            None => handshake_rx.await,
        }
        .map_err(|_| Error::Transport("connection closed before handshake".into()))?;

        info!(%conversation_id, "session connected");
        *self.conversation_id.lock() = Some(conversation_id.clone());
        Ok(conversation_id)
    }

    fn acquire_capture(
        &self,
        source: FrameSource,
        settings: &Settings,
    ) -> Result<(mpsc::UnboundedReceiver<Vec<u8>>, bool)> {
        let device = match source {
            FrameSource::Channel(rx) => {
                // No capture pipeline; the run loop gates on mute itself.
                return Ok((rx, true));
            }
            FrameSource::DefaultDevice => settings.capture.device.clone(),
            FrameSource::Device(name) => Some(name),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let capture = CapturePipeline::start(
            &CaptureConfig {
                device,
                frame_ms: settings.capture.frame_ms,
            },
            tx,
            Arc::clone(&self.muted),
        )
        .map_err(voice_call_core::Error::from)?;

        self.core.resources.lock().capture = Some(capture);
        Ok((rx, false))
    }

    /// Tear the session down. Idempotent; safe before, during, or after
    /// a connect.
    pub async fn disconnect(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.run.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.core.teardown(None, None);
    }
}

/// Full-duplex loop: outbound frames one way, routed events the other.
/// Exits on shutdown, transport closure, or a terminal routing outcome;
/// every exit path runs the same teardown.
async fn run_loop(
    mut transport: Box<dyn ConversationTransport>,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    mut router: MessageRouter,
    mut shutdown: watch::Receiver<bool>,
    core: SessionCore,
    gate_mute: bool,
    muted: Arc<AtomicBool>,
) {
    let mut frames_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                transport.close().await;
                core.teardown(None, None);
                break;
            }

            frame = frames.recv(), if frames_open => {
                let Some(frame) = frame else {
                    // Frame producer hung up; keep serving inbound events.
                    frames_open = false;
                    continue;
                };
                // Frames produced before the handshake have nowhere to
                // go on the remote side.
                if !core.state.read().is_connected() {
                    continue;
                }
                if gate_mute && muted.load(Ordering::Relaxed) {
                    continue;
                }
                if let Err(e) = transport.send_audio(&frame).await {
                    warn!("dropping outbound frame: {e}");
                }
            }

            event = transport.next_event() => {
                let Some(event) = event else {
                    core.teardown(Some("connection closed".into()), None);
                    break;
                };
                let output = router.route(event);
                for reply in output.replies {
                    if let Err(e) = transport.send_message(&reply).await {
                        warn!("failed to send reply: {e}");
                    }
                }
                match output.outcome {
                    RouterOutcome::Continue => {}
                    RouterOutcome::Ended { reason } => {
                        transport.close().await;
                        core.teardown(reason, None);
                        break;
                    }
                    RouterOutcome::Fatal(err) => {
                        transport.close().await;
                        core.teardown(Some(err.to_string()), Some(err));
                        break;
                    }
                }
            }
        }
    }
}
