/// Vision planner: sends the annotated screenshot and conversation to the
/// planner model and returns its free-text reply.
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_engine::context::{Context, Role as TurnRole};
use crate::errors::{PilotError, PilotResult};
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl};
use crate::perception::types::Perception;

const SYSTEM_PROMPT: &str = "\
You are an AI agent with the capacity to see the user's screen, click buttons and type text.
The user will ask you to do things. You will see the user's screen, then first think at a high
level about the steps needed to carry out the task. You will be given annotated screenshots with
codes mapping buttons and texts on the screen, which you can choose to click, type into, or
refresh to get an updated view, until the task is completed.
You are always very short and concise in your writing.";

/// The prompt the planner sent and the reply it got.
#[derive(Debug, Clone)]
pub struct PlanTurn {
    pub prompt: String,
    pub response: String,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, context: &Context, perception: &Perception) -> PilotResult<PlanTurn>;
}

pub fn initial_prompt(task: &str) -> String {
    format!(
        "Task: {task}\n\n\
         Here is a screenshot of the screen, tagged with labels like A1, A2, A3 on each interactive item. Please do two things:\n\n\
         A. High-level list of steps to follow, as a numbered list in English.\n\n\
         B. A list of actions to execute, each one of [CLICK A1] to click the A1 element, \
         [TYPE \"message\"] to type \"message\" (or [TYPE \"message\" A1] to click A1 first), \
         [PRESS ENTER] to press a key or a shortcut like [PRESS CMD+F], \
         and [REFRESH] to end the list and get a new screenshot.\n\
         Those are the ONLY options you have. To switch apps, use [PRESS CMD+SPACE] and then [REFRESH]. \
         If you want to click or type on an element that is not on the screen, issue a [REFRESH] first. \
         When the task is complete, answer with no actions."
    )
}

pub fn next_step_prompt(task: &str) -> String {
    format!(
        "I have executed the previous actions; here is the updated screenshot so you can plan the next ones.\n\
         Describe what you see and where it might have gone wrong, since the screen often changes and we have to course correct.\n\
         As a reminder, my goal is: {task}\n\n\
         List the next actions to take, if any (options are [CLICK <LABEL>], [TYPE \"<TEXT>\"], \
         [PRESS <KEY or SHORTCUT>] or [REFRESH]). Answer with no actions once the goal is reached."
    )
}

/// Planner backed by the `planner` role of the provider registry.
pub struct LlmPlanner {
    registry: Arc<ProviderRegistry>,
}

impl LlmPlanner {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// System prompt, prior turns, then the new prompt with the screenshot.
    pub fn build_messages(context: &Context, prompt: &str, image_data_uri: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.history().len() + 2);
        messages.push(ChatMessage::text("system", SYSTEM_PROMPT));
        for turn in context.history() {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            messages.push(ChatMessage::text(role, turn.content.clone()));
        }
        messages.push(ChatMessage::parts(
            "user",
            vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_data_uri.to_string(),
                        detail: Some("high".into()),
                    },
                },
            ],
        ));
        messages
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, context: &Context, perception: &Perception) -> PilotResult<PlanTurn> {
        let prompt = if context.is_first_turn() {
            initial_prompt(context.task())
        } else {
            next_step_prompt(context.task())
        };

        let (provider, cfg) = self.registry.call_config_for_role(Role::Planner)?;
        let messages = Self::build_messages(context, &prompt, &perception.image.data_uri);

        tracing::info!(
            provider = %provider.name(),
            model = %cfg.model,
            messages = messages.len(),
            labels = perception.label_map.len(),
            first_turn = context.is_first_turn(),
            "planning → calling LLM"
        );

        let response = provider
            .chat(messages, Vec::new(), &cfg)
            .await
            .map_err(|e| match e {
                PilotError::LlmProvider(msg) => {
                    PilotError::LlmProvider(format!("planner ({}): {msg}", provider.name()))
                }
                other => other,
            })?;

        Ok(PlanTurn {
            prompt,
            response: response.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::MessageContent;

    #[test]
    fn first_prompt_asks_for_both_sections() {
        let p = initial_prompt("send an email");
        assert!(p.contains("send an email"));
        assert!(p.contains("A. High-level"));
        assert!(p.contains("B. A list of actions"));
    }

    #[test]
    fn messages_carry_history_and_high_detail_image() {
        let mut ctx = Context::new("t");
        ctx.push_user("first prompt");
        ctx.push_assistant("first reply");

        let msgs = LlmPlanner::build_messages(&ctx, &next_step_prompt("t"), "data:image/png;base64,AA");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[2].role, "assistant");
        let MessageContent::Parts(parts) = &msgs[3].content else {
            panic!("expected multipart user message");
        };
        match &parts[1] {
            ContentPart::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/png;base64,AA");
                assert_eq!(image_url.detail.as_deref(), Some("high"));
            }
            other => panic!("unexpected part {other:?}"),
        }
    }
}
