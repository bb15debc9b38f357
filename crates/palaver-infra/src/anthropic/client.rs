//! AnthropicAdapter -- concrete [`ChatAdapter`] implementation for the
//! Anthropic Messages API.
//!
//! Sends requests to `/v1/messages` with the required authentication
//! headers. Supports both non-streaming (`send`) and streaming (`stream`)
//! modes. Every failure is normalized into [`GatewayError`] before it
//! leaves this module; no reqwest or Anthropic error shape escapes.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never
//! logged or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use palaver_core::adapter::{ChatAdapter, EventStream};
use palaver_types::chat::{
    ChatRequest, ChatResponse, ContentPart, Message, MessageRole, StopReason, ToolCall, Usage,
};
use palaver_types::error::GatewayError;

use super::streaming::create_anthropic_stream;
use super::types::{
    AnthropicContentBlock, AnthropicMessage, AnthropicNonStreamResponse, AnthropicRequest,
    AnthropicRequestBlock, AnthropicTool, ErrorPayload,
};

/// Anthropic Messages API adapter.
///
/// Owns its `reqwest::Client` (and so its connection pool) exclusively;
/// nothing else shares it. The per-request deadline belongs to the
/// dispatcher, so the client only bounds connection establishment.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

// AnthropicAdapter intentionally does NOT derive Debug so the API key
// never reaches any formatted output.

impl AnthropicAdapter {
    /// The Anthropic API version header value.
    pub(crate) const API_VERSION: &'static str = "2023-06-01";

    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    /// Create a new adapter talking to the public Anthropic endpoint.
    pub fn new(api_key: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a normalized [`ChatRequest`] into an [`AnthropicRequest`].
    ///
    /// System-role messages fold into the request-level system prompt;
    /// tool-role messages become user-role `tool_result` blocks, which is
    /// how the Messages API expects tool output back.
    fn to_wire_request(request: &ChatRequest, stream: bool) -> AnthropicRequest {
        let mut system_parts: Vec<String> = Vec::new();
        if let Some(system) = &request.system {
            system_parts.push(system.clone());
        }

        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            if message.role == MessageRole::System {
                system_parts.push(message.joined_text());
                continue;
            }
            messages.push(AnthropicMessage {
                role: wire_role(message.role),
                content: to_wire_blocks(message),
            });
        }

        let tools = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| AnthropicTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                })
                .collect()
        });

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            stream,
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
            tools,
        }
    }
}

fn wire_role(role: MessageRole) -> String {
    match role {
        MessageRole::Assistant => "assistant".to_string(),
        // Tool results travel as user-role content blocks.
        MessageRole::User | MessageRole::Tool | MessageRole::System => "user".to_string(),
    }
}

fn to_wire_blocks(message: &Message) -> Vec<AnthropicRequestBlock> {
    message
        .content
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => AnthropicRequestBlock::Text { text: text.clone() },
            ContentPart::ToolCall(call) => AnthropicRequestBlock::ToolUse {
                id: call.id.clone().unwrap_or_default(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            },
            ContentPart::ToolResult {
                tool_call_id,
                content,
                ..
            } => AnthropicRequestBlock::ToolResult {
                tool_use_id: tool_call_id.clone().unwrap_or_default(),
                content: content.clone(),
            },
        })
        .collect()
}

/// Map a non-success HTTP status (plus its body and an optional
/// `retry-after` hint) into the shared taxonomy.
pub(crate) fn map_error_status(
    status: reqwest::StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> GatewayError {
    // Prefer the provider's own message when the body parses.
    let message = serde_json::from_str::<ErrorPayload>(body)
        .map(|payload| payload.error.message)
        .unwrap_or_else(|_| snippet(body));

    match status.as_u16() {
        400 | 404 | 413 | 422 => GatewayError::InvalidRequest(message),
        401 | 403 => GatewayError::AuthFailure,
        429 => GatewayError::RateLimited { retry_after_ms },
        500..=599 => GatewayError::Unavailable(message),
        _ => GatewayError::Unknown(format!("HTTP {status}: {message}")),
    }
}

/// Map a reqwest transport failure into the shared taxonomy.
pub(crate) fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Parse a `retry-after` header value (whole seconds) into milliseconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1_000)
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

/// Fold a wire response into the normalized [`ChatResponse`].
fn response_from_wire(wire: AnthropicNonStreamResponse) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in wire.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: Some(id),
                name,
                arguments: input,
            }),
        }
    }

    let reported = wire
        .stop_reason
        .as_deref()
        .and_then(|s| s.parse::<StopReason>().ok());

    // A well-formed response with no content at all reads as empty
    // unless the provider asserted a more specific reason.
    let has_content = !text.is_empty() || !tool_calls.is_empty();
    let stop_reason = match (reported, has_content) {
        (Some(StopReason::EndTurn) | None, false) => StopReason::Empty,
        (Some(reason), _) => reason,
        (None, true) if !tool_calls.is_empty() => StopReason::ToolUse,
        (None, true) => StopReason::EndTurn,
    };

    ChatResponse {
        model: wire.model,
        text,
        tool_calls,
        stop_reason,
        usage: Usage {
            input_tokens: wire.usage.input_tokens,
            output_tokens: wire.usage.output_tokens,
        },
    }
}

impl ChatAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let body = Self::to_wire_request(request, false);
        let url = self.url("/v1/messages");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %error_body, "Anthropic API error response");
            return Err(map_error_status(status, retry_after, &error_body));
        }

        let wire: AnthropicNonStreamResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolViolation(format!("response body: {e}")))?;

        Ok(response_from_wire(wire))
    }

    fn stream(&self, request: ChatRequest) -> EventStream {
        let body = Self::to_wire_request(&request, true);
        let url = self.url("/v1/messages");

        create_anthropic_stream(&self.client, &url, body, &self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::AnthropicUsage;

    fn make_adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(SecretString::from("test-key-not-real"))
    }

    fn basic_request() -> ChatRequest {
        ChatRequest {
            provider: "anthropic".to_string(),
            model: "model-x".to_string(),
            messages: vec![Message::user("Hello")],
            system: Some("Be helpful".to_string()),
            max_tokens: 1024,
            temperature: Some(0.7),
            stop_sequences: None,
            tools: None,
            stream: false,
        }
    }

    #[test]
    fn test_adapter_name() {
        assert_eq!(make_adapter().name(), "anthropic");
    }

    #[test]
    fn test_base_url_override() {
        let adapter = make_adapter().with_base_url("http://localhost:8080".to_string());
        assert_eq!(adapter.url("/v1/messages"), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn test_to_wire_request_basics() {
        let wire = AnthropicAdapter::to_wire_request(&basic_request(), true);
        assert_eq!(wire.model, "model-x");
        assert!(wire.stream);
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
        assert_eq!(wire.system.as_deref(), Some("Be helpful"));
    }

    #[test]
    fn test_system_messages_fold_into_system_prompt() {
        let mut request = basic_request();
        request
            .messages
            .insert(0, Message::text(MessageRole::System, "Stay terse."));

        let wire = AnthropicAdapter::to_wire_request(&request, false);
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.system.as_deref(), Some("Be helpful\n\nStay terse."));
    }

    #[test]
    fn test_tool_result_becomes_user_block() {
        let mut request = basic_request();
        request.messages.push(Message {
            role: MessageRole::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: Some("toolu_1".to_string()),
                name: "read_file".to_string(),
                content: "file contents".to_string(),
            }],
        });

        let wire = AnthropicAdapter::to_wire_request(&request, false);
        let last = wire.messages.last().unwrap();
        assert_eq!(last.role, "user");
        match &last.content[0] {
            AnthropicRequestBlock::ToolResult { tool_use_id, content } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert_eq!(content, "file contents");
            }
            other => panic!("expected ToolResult block, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_definitions_translate() {
        let mut request = basic_request();
        request.tools = Some(vec![palaver_types::chat::ToolDefinition {
            name: "list_files".to_string(),
            description: "List files in a directory".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }]);

        let wire = AnthropicAdapter::to_wire_request(&request, false);
        let tools = wire.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list_files");
    }

    #[test]
    fn test_response_from_wire_happy_path() {
        let wire = AnthropicNonStreamResponse {
            id: "msg_1".to_string(),
            content: vec![AnthropicContentBlock::Text {
                text: "hello".to_string(),
            }],
            model: "model-x".to_string(),
            stop_reason: Some("end_turn".to_string()),
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };

        let response = response_from_wire(wire);
        assert_eq!(response.text, "hello");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 10);
    }

    #[test]
    fn test_empty_response_is_not_an_error() {
        let wire = AnthropicNonStreamResponse {
            id: "msg_1".to_string(),
            content: vec![],
            model: "model-x".to_string(),
            stop_reason: Some("end_turn".to_string()),
            usage: AnthropicUsage::default(),
        };

        let response = response_from_wire(wire);
        assert_eq!(response.text, "");
        assert_eq!(response.stop_reason, StopReason::Empty);
    }

    #[test]
    fn test_tool_use_response_maps_to_tool_calls() {
        let wire = AnthropicNonStreamResponse {
            id: "msg_1".to_string(),
            content: vec![AnthropicContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "search".to_string(),
                input: serde_json::json!({"q": "rust"}),
            }],
            model: "model-x".to_string(),
            stop_reason: Some("tool_use".to_string()),
            usage: AnthropicUsage::default(),
        };

        let response = response_from_wire(wire);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;

        assert!(matches!(
            map_error_status(StatusCode::BAD_REQUEST, None, "{}"),
            GatewayError::InvalidRequest(_)
        ));
        assert!(matches!(
            map_error_status(StatusCode::UNAUTHORIZED, None, ""),
            GatewayError::AuthFailure
        ));
        assert!(matches!(
            map_error_status(StatusCode::FORBIDDEN, None, ""),
            GatewayError::AuthFailure
        ));
        assert!(matches!(
            map_error_status(StatusCode::TOO_MANY_REQUESTS, Some(2_000), ""),
            GatewayError::RateLimited {
                retry_after_ms: Some(2_000)
            }
        ));
        assert!(matches!(
            map_error_status(StatusCode::INTERNAL_SERVER_ERROR, None, ""),
            GatewayError::Unavailable(_)
        ));
        // Anthropic's overload status is in the 5xx range.
        assert!(matches!(
            map_error_status(StatusCode::from_u16(529).unwrap(), None, ""),
            GatewayError::Unavailable(_)
        ));
    }

    #[test]
    fn test_status_mapping_prefers_provider_message() {
        let body = r#"{"error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#;
        match map_error_status(reqwest::StatusCode::BAD_REQUEST, None, body) {
            GatewayError::InvalidRequest(message) => {
                assert_eq!(message, "max_tokens too large");
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), Some(3_000));

        headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), None);
    }
}
