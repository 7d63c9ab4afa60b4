use std::fmt;

use serde::{Deserialize, Serialize};

use crate::perception::types::{LabelMap, Perception};

/// Lifecycle states of one automation session.
#[derive(Debug, Clone)]
pub enum SessionState {
    Capturing,
    Planning { perception: Perception },
    Parsing { perception: Perception, response: String },
    Dispatching { label_map: LabelMap, actions: Vec<Action> },
    Done { reason: DoneReason },
    Fatal { message: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Capturing => "capturing",
            SessionState::Planning { .. } => "planning",
            SessionState::Parsing { .. } => "parsing",
            SessionState::Dispatching { .. } => "dispatching",
            SessionState::Done { .. } => "done",
            SessionState::Fatal { .. } => "fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done { .. } | SessionState::Fatal { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The model answered with an empty action list.
    Completed,
    /// Iteration or wall-clock cap hit.
    LimitReached,
}

/// One step the model asked for. Labels refer to the capture the batch was
/// planned against and are meaningless after the next capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Click {
        label: String,
    },
    Type {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Press {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifier: Option<Modifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        second_modifier: Option<Modifier>,
        key: String,
    },
    Refresh,
}

impl Action {
    /// Required fields present and non-empty.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Action::Click { label } => !label.trim().is_empty(),
            Action::Type { text, .. } => !text.is_empty(),
            Action::Press { key, .. } => !key.trim().is_empty(),
            Action::Refresh => true,
        }
    }

    /// Trims labels and keys; an empty optional label becomes `None`.
    pub fn normalized(self) -> Self {
        match self {
            Action::Click { label } => Action::Click {
                label: label.trim().to_string(),
            },
            Action::Type { text, label } => Action::Type {
                text,
                label: label
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
            },
            Action::Press {
                modifier,
                second_modifier,
                key,
            } => Action::Press {
                modifier,
                second_modifier,
                key: key.trim().to_string(),
            },
            Action::Refresh => Action::Refresh,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Click { label } => write!(f, "[CLICK {label}]"),
            Action::Type { text, label: None } => write!(f, "[TYPE {text:?}]"),
            Action::Type {
                text,
                label: Some(label),
            } => write!(f, "[TYPE {text:?} {label}]"),
            Action::Press {
                modifier,
                second_modifier,
                key,
            } => {
                f.write_str("[PRESS ")?;
                for m in [modifier, second_modifier].into_iter().flatten() {
                    write!(f, "{m}+")?;
                }
                write!(f, "{key}]")
            }
            Action::Refresh => f.write_str("[REFRESH]"),
        }
    }
}

/// Held-down key in a PRESS combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum Modifier {
    /// Command on macOS, Super/Windows elsewhere.
    Cmd,
    Ctrl,
    Alt,
    Shift,
}

impl Modifier {
    /// Case-insensitive, with common aliases.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "CMD" | "COMMAND" | "META" | "SUPER" | "WIN" => Some(Modifier::Cmd),
            "CTRL" | "CONTROL" => Some(Modifier::Ctrl),
            "ALT" | "OPTION" => Some(Modifier::Alt),
            "SHIFT" => Some(Modifier::Shift),
            _ => None,
        }
    }
}

impl TryFrom<String> for Modifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Modifier::from_token(&value).ok_or_else(|| format!("unknown modifier '{value}'"))
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Modifier::Cmd => "CMD",
            Modifier::Ctrl => "CTRL",
            Modifier::Alt => "ALT",
            Modifier::Shift => "SHIFT",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_deserialize_from_tagged_json() {
        let a: Action = serde_json::from_str(r#"{"action":"CLICK","label":"A1"}"#).unwrap();
        assert_eq!(a, Action::Click { label: "A1".into() });

        let a: Action =
            serde_json::from_str(r#"{"action":"PRESS","modifier":"command","key":"v"}"#).unwrap();
        assert_eq!(
            a,
            Action::Press {
                modifier: Some(Modifier::Cmd),
                second_modifier: None,
                key: "v".into()
            }
        );

        let a: Action = serde_json::from_str(r#"{"action":"REFRESH"}"#).unwrap();
        assert_eq!(a, Action::Refresh);
    }

    #[test]
    fn unknown_modifier_fails_to_deserialize() {
        assert!(serde_json::from_str::<Action>(r#"{"action":"PRESS","modifier":"HYPER","key":"A"}"#).is_err());
    }

    #[test]
    fn well_formed_requires_non_empty_fields() {
        assert!(!Action::Click { label: " ".into() }.is_well_formed());
        assert!(!Action::Type { text: String::new(), label: None }.is_well_formed());
        assert!(Action::Type { text: "x".into(), label: Some(String::new()) }.is_well_formed());
        assert!(Action::Refresh.is_well_formed());
    }

    #[test]
    fn normalized_drops_empty_label() {
        let a = Action::Type { text: "hi".into(), label: Some("  ".into()) }.normalized();
        assert_eq!(a, Action::Type { text: "hi".into(), label: None });
    }

    #[test]
    fn display_uses_bracket_grammar() {
        let a = Action::Press {
            modifier: Some(Modifier::Cmd),
            second_modifier: Some(Modifier::Shift),
            key: "4".into(),
        };
        assert_eq!(a.to_string(), "[PRESS CMD+SHIFT+4]");
        assert_eq!(
            Action::Type { text: "hi".into(), label: Some("B2".into()) }.to_string(),
            r#"[TYPE "hi" B2]"#
        );
    }
}
