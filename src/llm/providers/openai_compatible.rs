use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::{LlmProvider, StreamSink};
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunk, StreamChunkKind, ToolCall,
    ToolDef,
};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
    sink: Option<StreamSink>,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, sink: Option<StreamSink>) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
            sink,
        }
    }

    /// Forward a chunk to the live sink, if anyone is listening.
    fn emit(&self, kind: StreamChunkKind, content: impl Into<String>) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(StreamChunk {
                kind,
                content: content.into(),
            });
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
    ) -> PilotResult<LlmResponse> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });
        if let Some(max_tokens) = cfg.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            "sending LLM request"
        );
        tracing::debug!(
            body = %sanitize_for_log(&body),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            self.emit(StreamChunkKind::Error, format!("{status}"));
            return Err(PilotError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Handle SSE streaming response.
    /// Forwards chunks to the sink and accumulates the full response to return.
    async fn handle_stream(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        let mut resp_content = String::new();
        let mut resp_reasoning = String::new();
        // Tool call accumulator: delta index → (id, type, name, accumulated_arguments)
        let mut tc_builders: BTreeMap<usize, (String, String, String, String)> = BTreeMap::new();
        let mut done_emitted = false;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;

            for line in lines.push(&bytes) {
                if line.is_empty() {
                    continue;
                }

                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => {
                        match chunk.kind {
                            StreamChunkKind::Reasoning => resp_reasoning.push_str(&chunk.content),
                            StreamChunkKind::Content => resp_content.push_str(&chunk.content),
                            StreamChunkKind::ToolCall => {
                                merge_tool_call_deltas(&chunk.content, &mut tc_builders)
                            }
                            StreamChunkKind::Error => {
                                let message = chunk.content.clone();
                                self.emit(StreamChunkKind::Error, chunk.content);
                                return Err(PilotError::LlmProvider(format!(
                                    "{} stream error: {message}",
                                    self.id
                                )));
                            }
                            StreamChunkKind::Done => {}
                        }

                        let is_done = chunk.kind == StreamChunkKind::Done;
                        self.emit(chunk.kind, chunk.content);
                        if is_done {
                            done_emitted = true;
                            break 'stream;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        // Fallback Done in case stream ended without [DONE] marker
        if !done_emitted {
            self.emit(StreamChunkKind::Done, "");
        }

        let tool_calls = build_tool_calls(tc_builders);

        tracing::info!(
            content_len = resp_content.len(),
            reasoning_len = resp_reasoning.len(),
            tool_calls = tool_calls.len(),
            tools = ?tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );

        Ok(LlmResponse {
            content: resp_content,
            reasoning: resp_reasoning,
            tool_calls,
        })
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> PilotResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let parsed = parse_completion(&json);

        tracing::info!(
            content_len = parsed.content.len(),
            tool_calls = parsed.tool_calls.len(),
            "LLM JSON response received"
        );

        if !parsed.content.is_empty() {
            self.emit(StreamChunkKind::Content, parsed.content.clone());
        }
        if !parsed.tool_calls.is_empty() {
            if let Ok(tc_json) = serde_json::to_string(&parsed.tool_calls) {
                self.emit(StreamChunkKind::ToolCall, tc_json);
            }
        }
        self.emit(StreamChunkKind::Done, "");

        Ok(parsed)
    }
}

/// Splits a byte stream into lines. Bytes are held until their line is
/// complete, so multi-byte characters split across network chunks decode intact.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `bytes` and return every line completed by them, trimmed.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

/// Read `choices[0].message` of a non-streaming completion.
fn parse_completion(json: &serde_json::Value) -> LlmResponse {
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    LlmResponse {
        content,
        reasoning,
        tool_calls,
    }
}

/// Copy of the request body with image payloads replaced, for debug logs.
fn sanitize_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            // Only array content can carry images.
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(
    chunk_content: &str,
    builders: &mut BTreeMap<usize, (String, String, String, String)>,
) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str() {
            if !id.is_empty() {
                entry.0 = id.to_string();
            }
        }
        if let Some(t) = delta["type"].as_str() {
            if !t.is_empty() {
                entry.1 = t.to_string();
            }
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.2.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

/// Convert accumulated tool-call builders into typed `ToolCall` structs.
fn build_tool_calls(builders: BTreeMap<usize, (String, String, String, String)>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_fragments_merge_by_index() {
        let mut builders = BTreeMap::new();
        merge_tool_call_deltas(
            r#"[{"index":0,"id":"call_1","type":"function","function":{"name":"CLICK","arguments":"{\"la"}}]"#,
            &mut builders,
        );
        merge_tool_call_deltas(
            r#"[{"index":0,"function":{"arguments":"bel\":\"A1\"}"}},{"index":1,"id":"call_2","function":{"name":"REFRESH","arguments":"{}"}}]"#,
            &mut builders,
        );
        let calls = build_tool_calls(builders);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "CLICK");
        assert_eq!(calls[0].function.arguments, r#"{"label":"A1"}"#);
        assert_eq!(calls[1].call_type, "function");
        assert_eq!(calls[1].function.name, "REFRESH");
    }

    #[test]
    fn characters_split_across_chunks_decode_intact() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"[TYPE \\\"café\\\"]\"}}]}\n\n";
        let bytes = body.as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut lines = LineBuffer::default();
        assert!(lines.push(&bytes[..split]).is_empty());
        let complete = lines.push(&bytes[split..]);
        assert_eq!(complete.len(), 2);

        let chunk = sse_parser::parse_sse_line(&complete[0]).unwrap().unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Content);
        assert_eq!(chunk.content, "[TYPE \"café\"]");
        assert!(complete[1].is_empty());
    }

    #[test]
    fn nameless_builders_are_dropped() {
        let mut builders = BTreeMap::new();
        merge_tool_call_deltas(r#"[{"index":0,"function":{"arguments":"{}"}}]"#, &mut builders);
        assert!(build_tool_calls(builders).is_empty());
    }

    #[test]
    fn completion_json_with_tool_calls() {
        let json = serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c", "type": "function",
                    "function": {"name": "TYPE", "arguments": "{\"text\":\"hi\"}"}}]
            }}]
        });
        let resp = parse_completion(&json);
        assert!(resp.content.is_empty());
        assert_eq!(resp.tool_calls[0].function.name, "TYPE");
    }

    #[test]
    fn log_body_omits_images() {
        let body = serde_json::json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA", "detail": "high"}}
                ]}
            ]
        });
        let logged = sanitize_for_log(&body);
        assert!(!logged.contains("AAAA"));
        assert!(logged.contains("<omitted_base64_image>"));
        assert!(logged.contains("look"));
    }
}
