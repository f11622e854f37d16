//! Core types for the duplex voice-call engine
//!
//! This crate provides foundational types used across all other crates:
//! - Scenario descriptors and dynamic variables
//! - Transcript entries and the turn-taking builder
//! - Connection state
//! - Error types

pub mod error;
pub mod scenario;
pub mod state;
pub mod transcript;

pub use error::{Error, Result};
pub use scenario::{ScenarioDescriptor, VariableBag, VariableValue};
pub use state::ConnectionState;
pub use transcript::{Role, TranscriptBuilder, TranscriptEntry};
