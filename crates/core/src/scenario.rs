//! Scenario descriptors and dynamic variables
//!
//! A scenario describes one conversation attempt: the system prompt, the
//! agent's first utterance, an optional voice, and optional persona fields
//! that shape agent behavior. Descriptors are immutable per attempt and
//! caller-owned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Scenario for a single conversation attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    /// System prompt, possibly containing HTML-ish markup to be flattened
    pub system_prompt_text: String,

    /// The agent's opening line
    pub initial_utterance: String,

    /// Optional voice override
    pub voice_id: Option<String>,

    /// Persona fields, appended to the prompt under fixed headings when present
    pub persona_name: Option<String>,
    pub persona_role: Option<String>,
    pub persona_traits: Option<String>,
    pub persona_objections: Option<String>,
    pub persona_questions: Option<String>,
}

impl ScenarioDescriptor {
    pub fn new(system_prompt_text: impl Into<String>, initial_utterance: impl Into<String>) -> Self {
        Self {
            system_prompt_text: system_prompt_text.into(),
            initial_utterance: initial_utterance.into(),
            ..Default::default()
        }
    }

    /// True if any persona field is set
    pub fn has_persona(&self) -> bool {
        self.persona_name.is_some()
            || self.persona_role.is_some()
            || self.persona_traits.is_some()
            || self.persona_objections.is_some()
            || self.persona_questions.is_some()
    }
}

/// A dynamic-variable value: string or number, serialized flat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    String(String),
    Number(f64),
}

impl From<&str> for VariableValue {
    fn from(s: &str) -> Self {
        VariableValue::String(s.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(s: String) -> Self {
        VariableValue::String(s)
    }
}

impl From<f64> for VariableValue {
    fn from(n: f64) -> Self {
        VariableValue::Number(n)
    }
}

impl From<i64> for VariableValue {
    fn from(n: i64) -> Self {
        VariableValue::Number(n as f64)
    }
}

/// Flat key/value map injected into the remote agent's prompt templating
/// at session start. Built once before connecting; sent at handshake.
pub type VariableBag = HashMap<String, VariableValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_value_serializes_flat() {
        let mut bag = VariableBag::new();
        bag.insert("customer_name".into(), "Priya".into());
        bag.insert("attempt".into(), VariableValue::Number(2.0));

        let json = serde_json::to_value(&bag).unwrap();
        assert_eq!(json["customer_name"], "Priya");
        assert_eq!(json["attempt"], 2.0);
    }

    #[test]
    fn test_has_persona() {
        let mut scenario = ScenarioDescriptor::new("prompt", "hello");
        assert!(!scenario.has_persona());
        scenario.persona_role = Some("skeptical buyer".into());
        assert!(scenario.has_persona());
    }
}
