use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent_engine::state::{Action, DoneReason};

/// Which tier produced an action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    Heuristic,
    Structured,
}

/// Progress notifications from a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        state: String,
    },
    Perceived {
        iteration: u32,
        labels: usize,
        image_path: Option<PathBuf>,
    },
    PlanReceived {
        iteration: u32,
        response: String,
    },
    ActionsParsed {
        tier: ParseTier,
        actions: Vec<Action>,
    },
    ActionDispatched {
        action: Action,
    },
    ActionSkipped {
        action: Action,
        label: String,
    },
    /// A PRESS named a key the input backend cannot send.
    KeyUnsupported {
        action: Action,
        key: String,
    },
    Refreshing {
        explicit: bool,
    },
    Finished {
        reason: DoneReason,
    },
    Failed {
        stage: String,
        message: String,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// No subscribers is fine; the event is dropped.
    pub fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.send(SessionEvent::Refreshing { explicit: true });
        bus.send(SessionEvent::Finished { reason: DoneReason::Completed });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Refreshing { explicit: true });
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Finished { reason: DoneReason::Completed }
        );
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        EventBus::new().send(SessionEvent::StateChanged { state: "capturing".into() });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::ActionSkipped {
            action: Action::Click { label: "Q7".into() },
            label: "Q7".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "action_skipped");
        assert_eq!(json["action"]["action"], "CLICK");
    }
}
