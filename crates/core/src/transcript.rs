//! Transcript entries and the turn-taking builder
//!
//! The transport delivers utterance text without timing, and
//! utterance-boundary detection lags real speech unpredictably. Stamping
//! each entry with its own arrival time therefore skews the transcript
//! toward whenever the remote happened to flush. Instead, each utterance
//! is stamped with when the previous utterance of the *other* speaker
//! finished, tracked through two cursors:
//!
//! - `last_agent_end`: when the agent last finished speaking
//! - `last_turn_end`: when either speaker last finished
//!
//! Agent utterances are stamped with `last_turn_end` and then advance
//! both cursors; user utterances are stamped with `last_agent_end` and
//! advance only `last_turn_end`. This compresses timing under rapid
//! interruptions; that artifact is accepted.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Speaker role for a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Agent => write!(f, "agent"),
            Role::User => write!(f, "user"),
        }
    }
}

/// One time-labeled utterance. Immutable once emitted; the engine keeps
/// no history of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,

    pub text: String,

    /// Wall-clock time of emission, epoch milliseconds
    pub timestamp_ms: i64,

    /// Seconds into the session this utterance is attributed to
    pub elapsed_seconds: f64,

    /// `elapsed_seconds` rendered as `M:SS`
    pub time_label: String,
}

/// Renders whole seconds as `M:SS`
fn format_time_label(elapsed_seconds: f64) -> String {
    let total = elapsed_seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Converts utterance events into ordered, time-labeled entries.
///
/// Entries come out in routing order, which may differ from true
/// chronological order if the remote reorders its own events.
#[derive(Debug, Default)]
pub struct TranscriptBuilder {
    last_agent_end: f64,
    last_turn_end: f64,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an agent utterance arriving at `now` seconds into the session.
    pub fn agent_utterance(&mut self, text: impl Into<String>, now: f64) -> TranscriptEntry {
        let stamped = self.last_turn_end;
        self.last_agent_end = now;
        self.last_turn_end = now;
        Self::entry(Role::Agent, text.into(), stamped)
    }

    /// Record a user utterance arriving at `now` seconds into the session.
    pub fn user_utterance(&mut self, text: impl Into<String>, now: f64) -> TranscriptEntry {
        let stamped = self.last_agent_end;
        self.last_turn_end = now;
        Self::entry(Role::User, text.into(), stamped)
    }

    /// Cursor: when the agent last finished speaking
    pub fn last_agent_end(&self) -> f64 {
        self.last_agent_end
    }

    /// Cursor: when either speaker last finished
    pub fn last_turn_end(&self) -> f64 {
        self.last_turn_end
    }

    fn entry(role: Role, text: String, elapsed_seconds: f64) -> TranscriptEntry {
        TranscriptEntry {
            role,
            text,
            timestamp_ms: Utc::now().timestamp_millis(),
            elapsed_seconds,
            time_label: format_time_label(elapsed_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_label() {
        assert_eq!(format_time_label(0.0), "0:00");
        assert_eq!(format_time_label(9.7), "0:09");
        assert_eq!(format_time_label(65.0), "1:05");
        assert_eq!(format_time_label(-3.0), "0:00");
    }

    #[test]
    fn test_first_agent_utterance_stamped_at_zero() {
        let mut builder = TranscriptBuilder::new();
        let entry = builder.agent_utterance("Hello there", 2.5);
        assert_eq!(entry.role, Role::Agent);
        assert_eq!(entry.elapsed_seconds, 0.0);
        assert_eq!(builder.last_agent_end(), 2.5);
        assert_eq!(builder.last_turn_end(), 2.5);
    }

    #[test]
    fn test_user_stamped_with_last_agent_end() {
        let mut builder = TranscriptBuilder::new();
        builder.agent_utterance("Hi, how can I help?", 3.0);

        // The user reply is attributed to when the agent finished, not to
        // when the remote's boundary detector flushed it.
        let entry = builder.user_utterance("I have a question", 7.2);
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.elapsed_seconds, 3.0);
        assert_eq!(entry.time_label, "0:03");

        // User utterances leave the agent cursor alone.
        assert_eq!(builder.last_agent_end(), 3.0);
        assert_eq!(builder.last_turn_end(), 7.2);
    }

    #[test]
    fn test_agent_user_agent_sequence() {
        let mut builder = TranscriptBuilder::new();
        builder.agent_utterance("opening", 2.0);
        let user = builder.user_utterance("reply", 6.0);
        assert_eq!(user.elapsed_seconds, 2.0);

        // Second agent utterance is stamped with the user's turn end.
        let agent = builder.agent_utterance("follow-up", 9.0);
        assert_eq!(agent.elapsed_seconds, 6.0);
        assert_eq!(builder.last_agent_end(), 9.0);
    }

    #[test]
    fn test_rapid_interruptions_compress() {
        // Two user utterances with no agent speech in between both get the
        // same stamp. Known artifact of the heuristic, kept deliberately.
        let mut builder = TranscriptBuilder::new();
        builder.agent_utterance("one", 1.0);
        let first = builder.user_utterance("two", 2.0);
        let second = builder.user_utterance("three", 3.0);
        assert_eq!(first.elapsed_seconds, second.elapsed_seconds);
    }
}
