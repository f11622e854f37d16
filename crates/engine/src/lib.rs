//! Session engine for real-time duplex voice conversations
//!
//! Ties the layers together: a [`ConversationSession`] composes the
//! scenario into a prompt, resolves a transport (direct or relayed),
//! runs microphone capture and jitter-buffered playback, and surfaces
//! transcript and lifecycle events to subscribers.
//!
//! ```no_run
//! use voice_call_engine::{ConversationSession, SessionConfig};
//! use voice_call_core::ScenarioDescriptor;
//! use voice_call_transport::ConnectionMode;
//!
//! # async fn demo() -> voice_call_core::Result<()> {
//! let scenario = ScenarioDescriptor::new("<p>You are a helpful agent.</p>", "Hello!");
//! let session = ConversationSession::new(
//!     SessionConfig::new(ConnectionMode::Direct, scenario).with_agent_id("agent-123"),
//! );
//! let mut events = session.events();
//! let conversation_id = session.connect().await?;
//! # let _ = (conversation_id, &mut events);
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod compositor;
mod router;
pub mod session;
pub mod settings;

pub use compositor::{compose, flatten_markup, ComposedSession};
pub use session::{ConversationSession, FrameSource, SessionConfig, SessionEvent};
pub use settings::{CaptureSettings, Settings};
