/// Structured action extraction: the tier-2 fallback when the bracket grammar
/// does not match. Asks a tool-calling model to restate the reply as calls to
/// the four action tools.
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_engine::parser::{actions_from_response, ParseOutcome};
use crate::errors::PilotResult;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::tools::load_action_tools;
use crate::llm::types::{ChatMessage, ToolDef};

const EXTRACTION_PROMPT: &str = "\
You are helping extract structured data from another bot's unstructured output.
That bot takes a user task, looks at the user's screen, and comes up with a list of discrete actions to execute.
You are responsible for extracting that list of actions as a sequence of tool calls, in order.
Only call the provided tools. If the output contains no actions, call no tools.";

#[async_trait]
pub trait ActionExtractor: Send + Sync {
    async fn extract(&self, reply: &str) -> PilotResult<ParseOutcome>;
}

pub struct LlmExtractor {
    registry: Arc<ProviderRegistry>,
    tools: Vec<ToolDef>,
}

impl LlmExtractor {
    pub fn new(registry: Arc<ProviderRegistry>) -> PilotResult<Self> {
        Ok(Self {
            registry,
            tools: load_action_tools()?,
        })
    }
}

#[async_trait]
impl ActionExtractor for LlmExtractor {
    async fn extract(&self, reply: &str) -> PilotResult<ParseOutcome> {
        let (provider, cfg) = self.registry.call_config_for_role(Role::Extractor)?;
        let messages = vec![
            ChatMessage::text("system", EXTRACTION_PROMPT),
            ChatMessage::text(
                "user",
                format!("Here is the output of the previous bot, please extract the list of actions:\n\n{reply}"),
            ),
        ];

        tracing::info!(provider = %provider.name(), model = %cfg.model, "extracting actions");
        let response = provider.chat(messages, self.tools.clone(), &cfg).await?;
        let outcome = actions_from_response(&response);

        match &outcome {
            ParseOutcome::Parsed(actions) => {
                tracing::info!(actions = actions.len(), "structured extraction succeeded")
            }
            ParseOutcome::Unrecognized => tracing::warn!("structured extraction gave nothing usable"),
        }
        Ok(outcome)
    }
}
