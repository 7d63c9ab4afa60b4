/// Conversation context for one session. Owned by the session loop and lent
/// by reference to the planner.
use serde::{Deserialize, Serialize};

use crate::agent_engine::state::Action;
use crate::perception::types::ResolutionScale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Context {
    task: String,
    history: Vec<Turn>,
    high_level_plan: Vec<String>,
    actions_history: Vec<Vec<Action>>,
    scale: Option<ResolutionScale>,
}

impl Context {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            history: Vec::new(),
            high_level_plan: Vec::new(),
            actions_history: Vec::new(),
            scale: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn is_first_turn(&self) -> bool {
        self.history.is_empty()
    }

    /// Completed planner round-trips.
    pub fn iteration_count(&self) -> usize {
        self.history.iter().filter(|t| t.role == Role::Assistant).count()
    }

    pub fn record_plan(&mut self, plan: impl Into<String>) {
        self.high_level_plan.push(plan.into());
    }

    pub fn plans(&self) -> &[String] {
        &self.high_level_plan
    }

    pub fn record_batch(&mut self, actions: Vec<Action>) {
        self.actions_history.push(actions);
    }

    pub fn batches(&self) -> &[Vec<Action>] {
        &self.actions_history
    }

    pub fn set_scale(&mut self, scale: ResolutionScale) {
        self.scale = Some(scale);
    }

    pub fn scale(&self) -> Option<ResolutionScale> {
        self.scale
    }
}
