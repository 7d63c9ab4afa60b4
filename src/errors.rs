use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Perception error: {0}")]
    Perception(String),

    /// The planner reply could not be split into its plan and action sections.
    #[error("Planning error: {reason}; raw reply: {raw:?}")]
    Planning { reason: String, raw: String },

    /// Neither the heuristic parser nor structured extraction produced actions.
    #[error("No actions could be parsed from the assistant reply: {raw:?}")]
    UnparseableActions { raw: String },

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Agent error: {0}")]
    Agent(String),

    /// A session stage failed; `source` is the underlying cause.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PilotError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl PilotError {
    /// Short name of the loop stage the error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            PilotError::Stage { stage, .. } => *stage,
            PilotError::Config(_) => "config",
            PilotError::Perception(_) => "perception",
            PilotError::Planning { .. } | PilotError::LlmProvider(_) | PilotError::SseParsing(_) => {
                "planning"
            }
            PilotError::UnparseableActions { .. } => "parsing",
            PilotError::Executor(_) => "dispatching",
            PilotError::Agent(_) => "agent",
            PilotError::Io(_) | PilotError::Json(_) | PilotError::Http(_) | PilotError::TomlDe(_) => {
                "io"
            }
        }
    }
}

impl PilotError {
    /// Attribute this error to a session stage. Already-attributed errors keep
    /// their original stage.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            PilotError::Stage { .. } => self,
            other => PilotError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, past any stage attribution.
    pub fn root(&self) -> &PilotError {
        match self {
            PilotError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_attribution_overrides_variant_stage() {
        let io = PilotError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(io.stage(), "io");
        let e = io.in_stage("planning");
        assert_eq!(e.stage(), "planning");
        assert!(matches!(e.root(), PilotError::Io(_)));
        assert!(e.to_string().starts_with("planning failed: IO error"));
    }

    #[test]
    fn attribution_is_applied_once() {
        let e = PilotError::Executor("stuck".into())
            .in_stage("dispatching")
            .in_stage("capturing");
        assert_eq!(e.stage(), "dispatching");
    }
}
