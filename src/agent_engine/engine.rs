/// Session engine: the capture → plan → parse → dispatch state machine.
///
/// One `Session` runs one task to completion. Each iteration of `run` takes the
/// current state by value, performs that stage, and installs the next state.
/// Any error moves the session to `Fatal` and is returned to the caller,
/// attributed to the stage that was running.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::agent_engine::context::Context;
use crate::agent_engine::event_bus::{EventBus, ParseTier, SessionEvent};
use crate::agent_engine::extractor::ActionExtractor;
use crate::agent_engine::history::{SessionTranscript, TranscriptEntry};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::parser::{parse_heuristic, split_plan_and_actions, ParseOutcome};
use crate::agent_engine::planner::Planner;
use crate::agent_engine::state::{Action, DoneReason, SessionState};
use crate::config::ExecutionConfig;
use crate::errors::{PilotError, PilotResult};
use crate::executor::dispatcher::{dispatch, DispatchOutcome};
use crate::executor::input::InputDriver;
use crate::perception::traits::Perceiver;
use crate::perception::types::{LabelMap, Perception};

/// The outside world a session talks to.
pub struct Collaborators {
    pub perceiver: Arc<dyn Perceiver>,
    pub planner: Arc<dyn Planner>,
    pub extractor: Arc<dyn ActionExtractor>,
    pub driver: Box<dyn InputDriver>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub reason: DoneReason,
    pub iterations: u32,
    pub transcript: Option<PathBuf>,
}

pub struct Session {
    state: SessionState,
    context: Context,
    perceiver: Arc<dyn Perceiver>,
    planner: Arc<dyn Planner>,
    extractor: Arc<dyn ActionExtractor>,
    driver: Box<dyn InputDriver>,
    execution: ExecutionConfig,
    loop_ctrl: LoopController,
    bus: EventBus,
    transcript: Option<SessionTranscript>,
}

impl Session {
    pub fn new(
        task: impl Into<String>,
        collaborators: Collaborators,
        execution: ExecutionConfig,
        transcript: Option<SessionTranscript>,
    ) -> Self {
        let Collaborators {
            perceiver,
            planner,
            extractor,
            driver,
        } = collaborators;
        Self {
            state: SessionState::Capturing,
            context: Context::new(task),
            perceiver,
            planner,
            extractor,
            driver,
            loop_ctrl: LoopController::from_config(&execution),
            execution,
            bus: EventBus::new(),
            transcript,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the session until it is done or fails.
    pub async fn run(&mut self) -> PilotResult<SessionReport> {
        tracing::info!(task = %self.context.task(), "session started");
        self.record(TranscriptEntry::now("task", Some(self.context.task().to_string()), None));

        loop {
            self.bus.send(SessionEvent::StateChanged {
                state: self.state.name().to_string(),
            });

            let state = std::mem::replace(&mut self.state, SessionState::Capturing);
            let stage = state.name();
            let next = match state {
                SessionState::Done { reason } => {
                    self.state = SessionState::Done { reason };
                    tracing::info!(?reason, iterations = self.loop_ctrl.iterations(), "session finished");
                    self.bus.send(SessionEvent::Finished { reason });
                    return Ok(SessionReport {
                        reason,
                        iterations: self.loop_ctrl.iterations(),
                        transcript: self.transcript.as_ref().map(|t| t.path().to_path_buf()),
                    });
                }
                SessionState::Fatal { message } => {
                    self.state = SessionState::Fatal {
                        message: message.clone(),
                    };
                    return Err(PilotError::Agent(format!("session already failed: {message}")));
                }
                SessionState::Capturing => self.capture().await,
                SessionState::Planning { perception } => self.plan(perception).await,
                SessionState::Parsing {
                    perception,
                    response,
                } => self.parse(perception, response).await,
                SessionState::Dispatching { label_map, actions } => {
                    self.dispatch_batch(&label_map, &actions).await
                }
            };

            match next {
                Ok(state) => {
                    tracing::debug!(state = state.name(), "transition");
                    self.state = state;
                }
                Err(e) => {
                    let e = e.in_stage(stage);
                    tracing::error!(stage, error = %e, "session failed");
                    self.record(TranscriptEntry::now("error", Some(e.to_string()), None));
                    self.state = SessionState::Fatal {
                        message: e.to_string(),
                    };
                    self.bus.send(SessionEvent::StateChanged {
                        state: self.state.name().to_string(),
                    });
                    self.bus.send(SessionEvent::Failed {
                        stage: stage.to_string(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    async fn capture(&mut self) -> PilotResult<SessionState> {
        if self.loop_ctrl.should_stop() {
            tracing::info!(iterations = self.loop_ctrl.iterations(), "loop limit reached");
            return Ok(SessionState::Done {
                reason: DoneReason::LimitReached,
            });
        }
        self.loop_ctrl.record_iteration();
        let iteration = self.loop_ctrl.iterations();

        let perception = self.perceiver.perceive().await?;
        self.context.set_scale(perception.scale);
        tracing::info!(
            iteration,
            labels = perception.label_map.len(),
            scale_w = perception.scale.width,
            scale_h = perception.scale.height,
            "Capturing → Planning"
        );
        self.bus.send(SessionEvent::Perceived {
            iteration,
            labels: perception.label_map.len(),
            image_path: perception.image.path.clone(),
        });
        Ok(SessionState::Planning { perception })
    }

    async fn plan(&mut self, perception: Perception) -> PilotResult<SessionState> {
        let turn = self.planner.plan(&self.context, &perception).await?;

        self.context.push_user(turn.prompt.clone());
        self.context.push_assistant(turn.response.clone());
        self.record(TranscriptEntry::now("user", Some(turn.prompt), None));
        self.record(TranscriptEntry::now("assistant", Some(turn.response.clone()), None));

        tracing::info!(chars = turn.response.len(), "Planning → Parsing");
        self.bus.send(SessionEvent::PlanReceived {
            iteration: self.loop_ctrl.iterations(),
            response: turn.response.clone(),
        });
        Ok(SessionState::Parsing {
            perception,
            response: turn.response,
        })
    }

    async fn parse(&mut self, perception: Perception, response: String) -> PilotResult<SessionState> {
        // The planner's reply to the first prompt is the only assistant turn so far.
        let first_turn = self.context.iteration_count() <= 1;

        let body = match split_plan_and_actions(&response) {
            Some((plan, actions)) => {
                tracing::debug!(plan = %plan, "high-level plan recorded");
                self.context.record_plan(plan);
                actions
            }
            None if first_turn => {
                return Err(PilotError::Planning {
                    reason: "reply has no 'A. High-level' / 'B.' sections".into(),
                    raw: response,
                });
            }
            None => response,
        };

        let (tier, actions) = match parse_heuristic(&body) {
            ParseOutcome::Parsed(actions) => (ParseTier::Heuristic, actions),
            ParseOutcome::Unrecognized => {
                tracing::info!("heuristic parse failed, falling back to structured extraction");
                match self.extractor.extract(&body).await? {
                    ParseOutcome::Parsed(actions) => (ParseTier::Structured, actions),
                    ParseOutcome::Unrecognized => {
                        return Err(PilotError::UnparseableActions { raw: body });
                    }
                }
            }
        };

        tracing::info!(?tier, count = actions.len(), "actions parsed");
        self.record(TranscriptEntry::now(
            "actions",
            None,
            serde_json::to_value(&actions).ok(),
        ));
        self.bus.send(SessionEvent::ActionsParsed {
            tier,
            actions: actions.clone(),
        });
        self.context.record_batch(actions.clone());

        if actions.is_empty() {
            tracing::info!("empty action list, task complete");
            return Ok(SessionState::Done {
                reason: DoneReason::Completed,
            });
        }
        Ok(SessionState::Dispatching {
            label_map: perception.label_map,
            actions,
        })
    }

    async fn dispatch_batch(&mut self, label_map: &LabelMap, actions: &[Action]) -> PilotResult<SessionState> {
        for (i, action) in actions.iter().enumerate() {
            if i > 0 {
                pause(self.execution.action_delay_ms).await;
            }
            match dispatch(action, label_map, self.driver.as_mut())? {
                DispatchOutcome::Performed => {
                    self.bus.send(SessionEvent::ActionDispatched {
                        action: action.clone(),
                    });
                }
                DispatchOutcome::Skipped { label } => {
                    self.bus.send(SessionEvent::ActionSkipped {
                        action: action.clone(),
                        label,
                    });
                }
                DispatchOutcome::UnknownKey { key } => {
                    self.bus.send(SessionEvent::KeyUnsupported {
                        action: action.clone(),
                        key,
                    });
                }
                DispatchOutcome::Refresh => {
                    let discarded = actions.len() - i - 1;
                    tracing::info!(discarded, "REFRESH → Capturing");
                    self.bus.send(SessionEvent::Refreshing { explicit: true });
                    pause(self.execution.refresh_delay_ms).await;
                    return Ok(SessionState::Capturing);
                }
            }
        }

        tracing::info!("batch finished → Capturing");
        self.bus.send(SessionEvent::Refreshing { explicit: false });
        pause(self.execution.settle_delay_ms).await;
        Ok(SessionState::Capturing)
    }

    /// Transcript failures are logged, never fatal.
    fn record(&mut self, entry: TranscriptEntry) {
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(e) = transcript.push(entry) {
                tracing::warn!(error = %e, "failed to write transcript entry");
            }
        }
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
