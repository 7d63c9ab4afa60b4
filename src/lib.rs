pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;

use crate::agent_engine::engine::{Collaborators, Session, SessionReport};
use crate::agent_engine::extractor::LlmExtractor;
use crate::agent_engine::history::SessionTranscript;
use crate::agent_engine::planner::LlmPlanner;
use crate::config::AppConfig;
use crate::errors::PilotResult;
use crate::executor::input::EnigoDriver;
use crate::llm::provider::StreamSink;
use crate::llm::registry::ProviderRegistry;
use crate::perception::ocr::recognizer_from_env;
use crate::perception::pipeline::ScreenPerceiver;
use crate::perception::traits::{ComponentDetector, TextRecognizer};
use crate::perception::yolo_detector::YoloDetector;

/// Wire the desktop collaborators from config and run one task to completion.
///
/// `sink` receives streamed planner output as it arrives.
pub async fn run(task: &str, config: &AppConfig, sink: Option<StreamSink>) -> PilotResult<SessionReport> {
    let registry = Arc::new(ProviderRegistry::from_config(config, sink));
    tracing::info!(providers = ?registry.list_names(), "LLM registry ready");

    let ocr: Option<Arc<dyn TextRecognizer>> = recognizer_from_env(&config.perception)?.map(Arc::from);
    let components: Option<Arc<dyn ComponentDetector>> = match config.perception.yolo_model.as_deref() {
        Some(path) => Some(Arc::new(YoloDetector::load(
            path,
            config.perception.yolo_confidence,
            config.perception.yolo_iou,
        )?)),
        None => None,
    };

    let perceiver = ScreenPerceiver::new(ocr, components, config.labeling.clone(), &config.perception);

    let transcript = if config.perception.transcript {
        Some(SessionTranscript::create(&config.perception.output_dir)?)
    } else {
        None
    };

    let collaborators = Collaborators {
        perceiver: Arc::new(perceiver),
        planner: Arc::new(LlmPlanner::new(registry.clone())),
        extractor: Arc::new(LlmExtractor::new(registry)?),
        driver: Box::new(EnigoDriver::new()?),
    };

    let mut session = Session::new(task, collaborators, config.execution.clone(), transcript);
    session.run().await
}
