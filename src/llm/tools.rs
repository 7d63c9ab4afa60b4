use crate::errors::{PilotError, PilotResult};
use crate::llm::types::ToolDef;

/// Loads the four action tool definitions from prompts/tools/actions.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_action_tools() -> PilotResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/actions.json");
    serde_json::from_str(json)
        .map_err(|e| PilotError::Config(format!("Failed to parse action tools: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_tools_parse() {
        let tools = load_action_tools().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, vec!["CLICK", "TYPE", "PRESS", "REFRESH"]);
        assert!(tools.iter().all(|t| t.def_type == "function"));
    }
}
