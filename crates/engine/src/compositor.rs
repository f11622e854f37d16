//! Prompt/variable compositor
//!
//! Flattens scenario markup, persona fields, and caller variables into
//! one system prompt and one flat variable map. Runs exactly once per
//! attempt, before the transport opens.

use voice_call_core::{ScenarioDescriptor, VariableBag, VariableValue};

/// Everything the handshake needs, composed once per attempt
#[derive(Debug, Clone)]
pub struct ComposedSession {
    pub prompt: String,
    pub first_message: String,
    pub voice_id: Option<String>,
    pub variables: VariableBag,
}

/// Compose the system prompt and variable map for one attempt.
///
/// Persona-derived variables are merged first; caller values win on key
/// collision.
pub fn compose(scenario: &ScenarioDescriptor, caller_vars: &VariableBag) -> ComposedSession {
    let mut prompt = flatten_markup(&scenario.system_prompt_text);

    for (heading, value) in persona_blocks(scenario) {
        prompt.push_str("\n\n");
        prompt.push_str(heading);
        prompt.push_str(":\n");
        prompt.push_str(value.trim());
    }

    let mut variables = derived_variables(scenario);
    for (key, value) in caller_vars {
        variables.insert(key.clone(), value.clone());
    }

    ComposedSession {
        prompt,
        first_message: scenario.initial_utterance.clone(),
        voice_id: scenario.voice_id.clone(),
        variables,
    }
}

fn persona_blocks(scenario: &ScenarioDescriptor) -> Vec<(&'static str, &str)> {
    let mut blocks = Vec::new();
    if let Some(v) = scenario.persona_name.as_deref() {
        blocks.push(("Persona name", v));
    }
    if let Some(v) = scenario.persona_role.as_deref() {
        blocks.push(("Persona role", v));
    }
    if let Some(v) = scenario.persona_traits.as_deref() {
        blocks.push(("Personality traits", v));
    }
    if let Some(v) = scenario.persona_objections.as_deref() {
        blocks.push(("Common objections", v));
    }
    if let Some(v) = scenario.persona_questions.as_deref() {
        blocks.push(("Typical questions", v));
    }
    blocks
}

fn derived_variables(scenario: &ScenarioDescriptor) -> VariableBag {
    let mut vars = VariableBag::new();
    let pairs = [
        ("persona_name", &scenario.persona_name),
        ("persona_role", &scenario.persona_role),
        ("persona_traits", &scenario.persona_traits),
        ("persona_objections", &scenario.persona_objections),
        ("persona_questions", &scenario.persona_questions),
    ];
    for (key, value) in pairs {
        if let Some(v) = value {
            vars.insert(key.to_string(), VariableValue::String(v.clone()));
        }
    }
    vars
}

/// Strip markup while preserving structure: paragraph boundaries become
/// blank lines, list items become `"- "` lines, remaining tags are
/// removed, entities are decoded.
pub fn flatten_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }

        // Scan to the closing '>'; unterminated tags are kept verbatim.
        let rest = &input[i..];
        let Some(end) = rest.find('>') else {
            out.push(c);
            continue;
        };
        let tag = rest[1..end].trim();
        while let Some(&(j, _)) = chars.peek() {
            if j > i + end {
                break;
            }
            chars.next();
        }

        let name = tag
            .trim_start_matches('/')
            .split(|ch: char| ch.is_whitespace() || ch == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        let closing = tag.starts_with('/');

        match name.as_str() {
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol" => {
                if closing {
                    out.push_str("\n\n");
                }
            }
            "br" => out.push('\n'),
            "li" => {
                if !closing {
                    out.push_str("\n- ");
                }
            }
            _ => {}
        }
    }

    let decoded = decode_entities(&out);
    normalize_whitespace(&decoded)
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Trim line ends, collapse runs of blank lines to one, trim the whole
fn normalize_whitespace(input: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;

    for line in input.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                lines.push("");
            }
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }

    lines.join("\n").trim().to_string()
}
