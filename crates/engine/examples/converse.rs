//! Minimal interactive call: connects to an agent and prints the
//! transcript until Ctrl-C.
//!
//! ```sh
//! cargo run --example converse -- direct <agent-id>
//! cargo run --example converse -- proxy
//! ```

use std::env;

use tracing_subscriber::EnvFilter;

use voice_call_core::ScenarioDescriptor;
use voice_call_engine::{ConversationSession, SessionConfig, SessionEvent, Settings};
use voice_call_transport::ConnectionMode;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(None)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let mut args = env::args().skip(1);
    let mode: ConnectionMode = args.next().unwrap_or_else(|| "direct".into()).parse()?;
    let agent_id = args.next();

    let scenario = ScenarioDescriptor::new(
        "<p>You are a friendly demo agent.</p><p>Keep answers short.</p>",
        "Hi! I'm the demo agent. What would you like to talk about?",
    );

    let mut config = SessionConfig::new(mode, scenario).with_settings(settings);
    if let Some(agent_id) = agent_id {
        config = config.with_agent_id(agent_id);
    }

    let session = ConversationSession::new(config);
    let mut events = session.events();

    let conversation_id = session.connect().await?;
    println!("connected: {conversation_id}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Transcript(entry)) => {
                    println!("[{}] {}: {}", entry.time_label, entry.role, entry.text);
                }
                Ok(SessionEvent::Error(msg)) => eprintln!("error: {msg}"),
                Ok(SessionEvent::Disconnected { reason }) => {
                    println!("disconnected: {reason:?}");
                    break;
                }
                Ok(SessionEvent::Connected { .. }) => {}
                Err(_) => break,
            },
        }
    }

    session.disconnect().await;
    Ok(())
}
