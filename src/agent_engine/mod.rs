pub mod context;
pub mod engine;
pub mod event_bus;
pub mod extractor;
pub mod history;
pub mod loop_control;
pub mod parser;
pub mod planner;
pub mod state;
