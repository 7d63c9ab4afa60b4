use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use screenpilot::agent_engine::context::Context;
use screenpilot::agent_engine::engine::{Collaborators, Session};
use screenpilot::agent_engine::event_bus::{ParseTier, SessionEvent};
use screenpilot::agent_engine::extractor::ActionExtractor;
use screenpilot::agent_engine::parser::ParseOutcome;
use screenpilot::agent_engine::planner::{PlanTurn, Planner};
use screenpilot::agent_engine::state::{Action, DoneReason, SessionState};
use screenpilot::config::ExecutionConfig;
use screenpilot::errors::{PilotError, PilotResult};
use screenpilot::executor::input::InputDriver;
use screenpilot::perception::traits::Perceiver;
use screenpilot::perception::types::{
    AnnotatedImage, LabelMap, LabelMapEntry, Perception, ResolutionScale, ScreenPoint, ScreenRect,
};

const FIRST_REPLY_PREFIX: &str = "A. High-level plan\n1. Open compose\n2. Write the mail\nB. Actions\n";

struct FakePerceiver {
    captures: AtomicUsize,
}

#[async_trait]
impl Perceiver for FakePerceiver {
    async fn perceive(&self) -> PilotResult<Perception> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let mut label_map = LabelMap::default();
        for (label, x) in [("A1", 100), ("A2", 300)] {
            label_map.insert(
                label.into(),
                ScreenPoint { x: x - 12, y: 44 },
                LabelMapEntry {
                    text: format!("button {label}"),
                    rect: ScreenRect { x, y: 50, width: 80, height: 20 },
                },
            );
        }
        Ok(Perception {
            label_map,
            scale: ResolutionScale::IDENTITY,
            image: AnnotatedImage {
                png: Vec::new(),
                data_uri: "data:image/png;base64,".into(),
                path: None,
            },
        })
    }
}

/// Hands out replies in order and repeats the last one forever.
struct ScriptedPlanner {
    replies: Mutex<VecDeque<String>>,
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, context: &Context, _perception: &Perception) -> PilotResult<PlanTurn> {
        let mut replies = self.replies.lock().unwrap();
        let response = if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap_or_default()
        };
        Ok(PlanTurn {
            prompt: format!("prompt for turn {}", context.iteration_count() + 1),
            response,
        })
    }
}

/// Fails every call with a transport-level error.
struct DisconnectedPlanner;

#[async_trait]
impl Planner for DisconnectedPlanner {
    async fn plan(&self, _context: &Context, _perception: &Perception) -> PilotResult<PlanTurn> {
        Err(PilotError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

/// Returns queued outcomes, then `Parsed([])`.
struct ScriptedExtractor {
    outcomes: Mutex<VecDeque<ParseOutcome>>,
    calls: AtomicUsize,
}

#[async_trait]
impl ActionExtractor for ScriptedExtractor {
    async fn extract(&self, _reply: &str) -> PilotResult<ParseOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ParseOutcome::Parsed(Vec::new())))
    }
}

struct RecordingDriver {
    calls: Arc<Mutex<Vec<String>>>,
}

impl InputDriver for RecordingDriver {
    fn move_to(&mut self, point: ScreenPoint) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("move {},{}", point.x, point.y));
        Ok(())
    }
    fn click(&mut self) -> PilotResult<()> {
        self.calls.lock().unwrap().push("click".into());
        Ok(())
    }
    fn type_text(&mut self, text: &str) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("type {text}"));
        Ok(())
    }
    fn press(&mut self, key: &str) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("press {key}"));
        Ok(())
    }
    fn hotkey(&mut self, modifiers: &[screenpilot::agent_engine::state::Modifier], key: &str) -> PilotResult<()> {
        let mods: Vec<String> = modifiers.iter().map(|m| m.to_string()).collect();
        self.calls.lock().unwrap().push(format!("hotkey {}+{key}", mods.join("+")));
        Ok(())
    }
    fn paste(&mut self, text: &str) -> PilotResult<()> {
        self.calls.lock().unwrap().push(format!("paste {text}"));
        Ok(())
    }
    fn window_focused_at(&mut self, _point: ScreenPoint) -> PilotResult<bool> {
        Ok(true)
    }
    fn supports_key(&self, key: &str) -> bool {
        key != "F24"
    }
}

struct Harness {
    session: Session,
    perceiver: Arc<FakePerceiver>,
    extractor: Arc<ScriptedExtractor>,
    calls: Arc<Mutex<Vec<String>>>,
    events: tokio::sync::broadcast::Receiver<SessionEvent>,
}

impl Harness {
    fn new(replies: &[&str], extractions: Vec<ParseOutcome>, max_iterations: Option<u32>) -> Self {
        let planner = Arc::new(ScriptedPlanner {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        });
        Self::with_planner(planner, extractions, max_iterations)
    }

    fn with_planner(planner: Arc<dyn Planner>, extractions: Vec<ParseOutcome>, max_iterations: Option<u32>) -> Self {
        let perceiver = Arc::new(FakePerceiver {
            captures: AtomicUsize::new(0),
        });
        let extractor = Arc::new(ScriptedExtractor {
            outcomes: Mutex::new(extractions.into()),
            calls: AtomicUsize::new(0),
        });
        let calls = Arc::new(Mutex::new(Vec::new()));
        let execution = ExecutionConfig {
            action_delay_ms: 0,
            refresh_delay_ms: 0,
            settle_delay_ms: 0,
            max_iterations,
            max_duration_minutes: None,
        };
        let session = Session::new(
            "send an email",
            Collaborators {
                perceiver: perceiver.clone(),
                planner,
                extractor: extractor.clone(),
                driver: Box::new(RecordingDriver {
                    calls: calls.clone(),
                }),
            },
            execution,
            None,
        );
        let events = session.subscribe();
        Self {
            session,
            perceiver,
            extractor,
            calls,
            events,
        }
    }

    fn captures(&self) -> usize {
        self.perceiver.captures.load(Ordering::SeqCst)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

fn first(actions: &str) -> String {
    format!("{FIRST_REPLY_PREFIX}{actions}")
}

#[tokio::test]
async fn refresh_discards_the_rest_of_the_batch() {
    let reply = first("[CLICK A1]\n[REFRESH]\n[CLICK A2]");
    let mut h = Harness::new(&[&reply, "The email has been sent."], Vec::new(), None);

    let report = h.session.run().await.unwrap();

    assert_eq!(report.reason, DoneReason::Completed);
    assert_eq!(h.captures(), 2);
    assert_eq!(h.calls(), vec!["move 140,60".to_string(), "click".to_string()]);
    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::Refreshing { explicit: true }));
    assert!(!events.iter().any(|e| matches!(
        e,
        SessionEvent::ActionDispatched { action: Action::Click { label } } if label == "A2"
    )));
}

#[tokio::test]
async fn empty_batch_finishes_without_recapturing() {
    let reply = first("Nothing left to do.");
    let mut h = Harness::new(&[&reply], vec![ParseOutcome::Parsed(Vec::new())], None);

    let report = h.session.run().await.unwrap();

    assert_eq!(report.reason, DoneReason::Completed);
    assert_eq!(report.iterations, 1);
    assert_eq!(h.captures(), 1);
    assert!(h.calls().is_empty());
    assert!(matches!(h.session.state(), SessionState::Done { reason: DoneReason::Completed }));
    assert!(h
        .drain_events()
        .contains(&SessionEvent::Finished { reason: DoneReason::Completed }));
}

#[tokio::test]
async fn structured_extraction_runs_when_heuristic_fails() {
    let reply = first("Click the compose button, labelled A2.");
    let mut h = Harness::new(
        &[&reply, "Done."],
        vec![ParseOutcome::Parsed(vec![Action::Click { label: "A2".into() }])],
        None,
    );

    h.session.run().await.unwrap();

    assert_eq!(h.calls(), vec!["move 340,60".to_string(), "click".to_string()]);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 2);
    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::ActionsParsed {
        tier: ParseTier::Structured,
        actions: vec![Action::Click { label: "A2".into() }],
    }));
}

#[tokio::test]
async fn heuristic_success_skips_extraction() {
    let reply = first("[TYPE \"hello\" A1]");
    let mut h = Harness::new(&[&reply, "Finished."], Vec::new(), None);

    h.session.run().await.unwrap();

    // Only the closing "Finished." reply reaches the extractor.
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls().last().map(String::as_str), Some("type hello"));
    assert_eq!(h.session.context().batches()[0].len(), 1);
    assert_eq!(h.session.context().plans().len(), 1);
}

#[tokio::test]
async fn unparseable_reply_is_fatal_with_raw_text() {
    let reply = first("I am not sure what to do here.");
    let mut h = Harness::new(&[&reply], vec![ParseOutcome::Unrecognized], None);

    let err = h.session.run().await.unwrap_err();

    assert_eq!(err.stage(), "parsing");
    match err.root() {
        PilotError::UnparseableActions { raw } => assert!(raw.contains("not sure what to do")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(h.session.state(), SessionState::Fatal { .. }));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        SessionEvent::Failed { stage, .. } if stage == "parsing"
    )));
}

#[tokio::test]
async fn first_reply_without_sections_is_a_planning_error() {
    let mut h = Harness::new(&["[CLICK A1]"], Vec::new(), None);

    let err = h.session.run().await.unwrap_err();

    assert!(matches!(err.root(), PilotError::Planning { raw, .. } if raw == "[CLICK A1]"));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn later_replies_may_omit_sections() {
    let reply = first("[CLICK A1]");
    let mut h = Harness::new(&[&reply, "[CLICK A2]", "All done."], Vec::new(), None);

    let report = h.session.run().await.unwrap();

    assert_eq!(report.reason, DoneReason::Completed);
    assert_eq!(h.captures(), 3);
    assert_eq!(h.session.context().plans().len(), 1);
    assert_eq!(h.calls().iter().filter(|c| *c == "click").count(), 2);
}

#[tokio::test]
async fn absent_label_is_skipped_and_batch_continues() {
    let reply = first("[CLICK Q9]\n[CLICK A1]");
    let mut h = Harness::new(&[&reply, "Done."], Vec::new(), None);

    h.session.run().await.unwrap();

    assert_eq!(h.calls(), vec!["move 140,60".to_string(), "click".to_string()]);
    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::ActionSkipped {
        action: Action::Click { label: "Q9".into() },
        label: "Q9".into(),
    }));
    assert!(events.contains(&SessionEvent::ActionDispatched {
        action: Action::Click { label: "A1".into() },
    }));
}

#[tokio::test]
async fn batch_end_is_an_implicit_refresh() {
    let reply = first("[PRESS \"CMD+SHIFT+4\"]");
    let mut h = Harness::new(&[&reply, "Done."], Vec::new(), None);

    h.session.run().await.unwrap();

    assert_eq!(h.captures(), 2);
    assert_eq!(h.calls(), vec!["hotkey CMD+SHIFT+4".to_string()]);
    assert!(h
        .drain_events()
        .contains(&SessionEvent::Refreshing { explicit: false }));
}

#[tokio::test]
async fn iteration_cap_ends_as_limit_reached() {
    let reply = first("[CLICK A1]");
    let mut h = Harness::new(&[&reply], Vec::new(), Some(2));

    let report = h.session.run().await.unwrap();

    assert_eq!(report.reason, DoneReason::LimitReached);
    assert_eq!(report.iterations, 2);
    assert_eq!(h.captures(), 2);
    assert_eq!(h.calls().iter().filter(|c| *c == "click").count(), 2);
}

#[tokio::test]
async fn planner_transport_failure_is_reported_as_planning() {
    let mut h = Harness::with_planner(Arc::new(DisconnectedPlanner), Vec::new(), None);

    let err = h.session.run().await.unwrap_err();

    assert_eq!(err.stage(), "planning");
    assert!(matches!(err.root(), PilotError::Io(_)));
    assert_eq!(h.captures(), 1);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        SessionEvent::Failed { stage, .. } if stage == "planning"
    )));
}

#[tokio::test]
async fn unsupported_key_is_skipped_and_batch_continues() {
    let reply = first("[PRESS F24]\n[CLICK A1]");
    let mut h = Harness::new(&[&reply, "Done."], Vec::new(), None);

    let report = h.session.run().await.unwrap();

    assert_eq!(report.reason, DoneReason::Completed);
    assert_eq!(h.calls(), vec!["move 140,60".to_string(), "click".to_string()]);
    assert!(h.drain_events().contains(&SessionEvent::KeyUnsupported {
        action: Action::Press {
            modifier: None,
            second_modifier: None,
            key: "F24".into(),
        },
        key: "F24".into(),
    }));
}
