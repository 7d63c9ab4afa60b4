/// Action grammar: turning the planner's free text into `Action`s.
///
/// Tier 1 is a bracket-directive matcher over the reply text. Tier 2 reshapes a
/// structured-extraction reply (native tool calls or a JSON array in the
/// content). Both are pure; the session loop decides when tier 2 runs.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent_engine::state::{Action, Modifier};
use crate::llm::types::LlmResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Possibly empty; empty means the task is complete.
    Parsed(Vec<Action>),
    Unrecognized,
}

static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[(\w+)(?:\s+"?([^"]+?)"?)?(?:\s+(\w+))?\]"#).expect("directive regex must compile")
});

static SECTIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s#*]*A\.\s*High.?level([\s\S]*?)^[\s#*]*B\.\s*([\s\S]*)")
        .expect("sections regex must compile")
});

/// Tier 1: first bracketed directive on each line.
///
/// Any unknown directive or malformed argument rejects the whole reply.
pub fn parse_heuristic(text: &str) -> ParseOutcome {
    let mut actions = Vec::new();

    for line in text.lines() {
        let Some(caps) = DIRECTIVE_RE.captures(line) else {
            continue;
        };
        let word = &caps[1];
        let argument = caps.get(2).map(|m| m.as_str().trim()).filter(|s| !s.is_empty());
        let trailing = caps.get(3).map(|m| m.as_str().to_string());

        let action = match (word, argument) {
            ("CLICK", Some(label)) => Action::Click {
                label: label.to_string(),
            },
            ("TYPE", Some(text)) => Action::Type {
                text: text.to_string(),
                label: trailing,
            },
            ("PRESS", Some(combo)) => match parse_press(combo) {
                Some(press) => press,
                None => {
                    tracing::debug!(combo, "unparseable PRESS combination");
                    return ParseOutcome::Unrecognized;
                }
            },
            ("REFRESH", _) => Action::Refresh,
            _ => {
                tracing::debug!(word, line, "unknown or incomplete directive");
                return ParseOutcome::Unrecognized;
            }
        };
        actions.push(action);
    }

    if actions.is_empty() {
        ParseOutcome::Unrecognized
    } else {
        ParseOutcome::Parsed(actions)
    }
}

/// `CMD+SHIFT+4` → (Cmd, Shift, "4"); `CTRL+C` → (Ctrl, -, "C"); `ENTER` → (-, -, "ENTER").
pub fn parse_press(combo: &str) -> Option<Action> {
    let parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let (modifier, second_modifier, key) = match parts.as_slice() {
        [key] => (None, None, *key),
        [m, key] => (Some(Modifier::from_token(m)?), None, *key),
        [m1, m2, key] => (
            Some(Modifier::from_token(m1)?),
            Some(Modifier::from_token(m2)?),
            *key,
        ),
        _ => return None,
    };
    if key.is_empty() {
        return None;
    }
    Some(Action::Press {
        modifier,
        second_modifier,
        key: key.to_string(),
    })
}

/// Split a reply into its `A. High-level ...` plan and `B. ...` action section.
pub fn split_plan_and_actions(text: &str) -> Option<(String, String)> {
    let caps = SECTIONS_RE.captures(text)?;
    Some((caps[1].trim().to_string(), caps[2].trim().to_string()))
}

/// Tier 2: validate and reshape a structured-extraction reply.
pub fn actions_from_response(response: &LlmResponse) -> ParseOutcome {
    if !response.tool_calls.is_empty() {
        let mut actions = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let arguments: serde_json::Value = if call.function.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                match serde_json::from_str(&call.function.arguments) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(error = %e, tool = %call.function.name, "tool arguments are not JSON");
                        return ParseOutcome::Unrecognized;
                    }
                }
            };
            match action_from_call(&call.function.name, arguments) {
                Some(action) => actions.push(action),
                None => return ParseOutcome::Unrecognized,
            }
        }
        return ParseOutcome::Parsed(actions);
    }

    let content = strip_code_fences(&response.content);
    if content.is_empty() {
        return ParseOutcome::Parsed(Vec::new());
    }

    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(content) else {
        tracing::debug!("extraction content is not a JSON array");
        return ParseOutcome::Unrecognized;
    };

    let mut actions = Vec::with_capacity(items.len());
    for item in items {
        let (name, arguments) = if let Some(recipient) = item["recipient_name"].as_str() {
            (recipient, item["parameters"].clone())
        } else if let Some(name) = item["name"].as_str() {
            let arguments = match &item["arguments"] {
                // Some providers double-encode the arguments object.
                serde_json::Value::String(s) => serde_json::from_str(s).unwrap_or(serde_json::Value::Null),
                other => other.clone(),
            };
            (name, arguments)
        } else {
            return ParseOutcome::Unrecognized;
        };
        match action_from_call(name, arguments) {
            Some(action) => actions.push(action),
            None => return ParseOutcome::Unrecognized,
        }
    }
    ParseOutcome::Parsed(actions)
}

/// `name` may carry a `functions.` prefix. Empty-string and null arguments
/// count as absent.
fn action_from_call(name: &str, arguments: serde_json::Value) -> Option<Action> {
    let name = name.strip_prefix("functions.").unwrap_or(name);
    if !matches!(name, "CLICK" | "TYPE" | "PRESS" | "REFRESH") {
        tracing::debug!(name, "unknown tool name");
        return None;
    }

    let mut object = serde_json::Map::new();
    object.insert("action".into(), serde_json::Value::String(name.to_string()));
    match arguments {
        serde_json::Value::Object(args) => {
            for (k, v) in args {
                let absent = v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty());
                if !absent && k != "action" {
                    object.insert(k, v);
                }
            }
        }
        serde_json::Value::Null => {}
        _ => return None,
    }

    let action: Action = serde_json::from_value(serde_json::Value::Object(object)).ok()?;
    let action = action.normalized();
    action.is_well_formed().then_some(action)
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
