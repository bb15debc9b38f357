//! GoogleAdapter -- concrete [`ChatAdapter`] implementation for the
//! Google Generative Language API.
//!
//! Sends requests to `models/{model}:generateContent` (and the
//! `:streamGenerateContent?alt=sse` sibling for streaming) with the
//! `x-goog-api-key` header. Every failure is normalized into
//! [`GatewayError`] before it leaves this module.
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

use super::streaming::create_google_stream;
use super::types::{
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, GoogleContent,
    GoogleErrorResponse, GoogleFunctionCall, GoogleFunctionDeclaration, GoogleFunctionResponse,
    GooglePart, GoogleTools,
};

/// Google Generative Language API adapter.
///
/// Owns its `reqwest::Client` exclusively. The per-request deadline
/// belongs to the dispatcher, so the client only bounds connection
/// establishment.
pub struct GoogleAdapter {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

// GoogleAdapter intentionally does NOT derive Debug so the API key never
// reaches any formatted output.

impl GoogleAdapter {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

    /// Create a new adapter talking to the public endpoint.
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

    /// Build the full URL for a model method, e.g.
    /// `.../v1beta/models/gemini-2.0-flash:generateContent`.
    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{model}:{method}", self.base_url)
    }

    /// Convert a normalized [`ChatRequest`] into the wire request.
    ///
    /// System content (the request-level prompt plus any system-role
    /// messages) folds into `systemInstruction`; assistant turns map to
    /// the "model" role; tool results become `functionResponse` parts on
    /// a user turn.
    fn to_wire_request(request: &ChatRequest) -> GenerateContentRequest {
        let mut system_parts: Vec<GooglePart> = Vec::new();
        if let Some(system) = &request.system {
            system_parts.push(GooglePart::text(system.clone()));
        }

        let mut contents = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            if message.role == MessageRole::System {
                system_parts.push(GooglePart::text(message.joined_text()));
                continue;
            }
            contents.push(GoogleContent {
                role: Some(wire_role(message.role)),
                parts: to_wire_parts(message),
            });
        }

        let tools = request.tools.as_ref().map(|tools| {
            vec![GoogleTools {
                function_declarations: tools
                    .iter()
                    .map(|tool| GoogleFunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    })
                    .collect(),
            }]
        });

        GenerateContentRequest {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(GoogleContent {
                    role: None,
                    parts: system_parts,
                })
            },
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(request.max_tokens),
                temperature: request.temperature,
                stop_sequences: request.stop_sequences.clone(),
            }),
            tools,
        }
    }
}

fn wire_role(role: MessageRole) -> String {
    match role {
        MessageRole::Assistant => "model".to_string(),
        MessageRole::User | MessageRole::Tool | MessageRole::System => "user".to_string(),
    }
}

fn to_wire_parts(message: &Message) -> Vec<GooglePart> {
    message
        .content
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => GooglePart::text(text.clone()),
            ContentPart::ToolCall(call) => GooglePart {
                function_call: Some(GoogleFunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..Default::default()
            },
            ContentPart::ToolResult { name, content, .. } => GooglePart {
                function_response: Some(GoogleFunctionResponse {
                    name: name.clone(),
                    response: serde_json::json!({ "result": content }),
                }),
                ..Default::default()
            },
        })
        .collect()
}

/// Map the API's `finishReason` string to the normalized stop reason.
pub(crate) fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "STOP" => StopReason::EndTurn,
        "MAX_TOKENS" => StopReason::MaxTokens,
        // SAFETY, RECITATION, OTHER, ... have no normalized counterpart;
        // the turn still ended.
        _ => StopReason::EndTurn,
    }
}

/// Map a non-success HTTP status plus its error envelope into the shared
/// taxonomy.
pub(crate) fn map_error_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<GoogleErrorResponse>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status.as_u16() {
        400 | 404 => GatewayError::InvalidRequest(message),
        401 | 403 => GatewayError::AuthFailure,
        429 => GatewayError::RateLimited {
            retry_after_ms: None,
        },
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

/// Fold a wire response into the normalized [`ChatResponse`].
fn response_from_wire(wire: GenerateContentResponse, fallback_model: &str) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut reported: Option<StopReason> = None;

    if let Some(candidate) = wire.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(t) = part.text {
                    text.push_str(&t);
                }
                if let Some(call) = part.function_call {
                    tool_calls.push(ToolCall {
                        // The API does not issue call ids.
                        id: None,
                        name: call.name,
                        arguments: call.args,
                    });
                }
            }
        }
        reported = candidate.finish_reason.as_deref().map(map_finish_reason);
    }

    let has_content = !text.is_empty() || !tool_calls.is_empty();
    let stop_reason = if !tool_calls.is_empty() {
        StopReason::ToolUse
    } else {
        match (reported, has_content) {
            (Some(StopReason::EndTurn) | None, false) => StopReason::Empty,
            (Some(reason), _) => reason,
            (None, true) => StopReason::EndTurn,
        }
    };

    ChatResponse {
        model: wire
            .model_version
            .unwrap_or_else(|| fallback_model.to_string()),
        text,
        tool_calls,
        stop_reason,
        usage: wire
            .usage_metadata
            .map(|meta| Usage {
                input_tokens: meta.prompt_token_count,
                output_tokens: meta.candidates_token_count,
            })
            .unwrap_or_default(),
    }
}

impl ChatAdapter for GoogleAdapter {
    fn name(&self) -> &str {
        "google"
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let body = Self::to_wire_request(request);
        let url = self.url(&request.model, "generateContent");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %error_body, "Google API error response");
            return Err(map_error_status(status, &error_body));
        }

        let wire: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolViolation(format!("response body: {e}")))?;

        Ok(response_from_wire(wire, &request.model))
    }

    fn stream(&self, request: ChatRequest) -> EventStream {
        let body = Self::to_wire_request(&request);
        let url = format!(
            "{}?alt=sse",
            self.url(&request.model, "streamGenerateContent")
        );

        create_google_stream(&self.client, &url, body, &self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{GoogleCandidate, GoogleUsageMetadata};

    fn make_adapter() -> GoogleAdapter {
        GoogleAdapter::new(SecretString::from("test-key-not-real"))
    }

    fn basic_request() -> ChatRequest {
        ChatRequest {
            provider: "google".to_string(),
            model: "gemini-2.0-flash".to_string(),
            messages: vec![Message::user("Hello")],
            system: Some("Be helpful".to_string()),
            max_tokens: 1024,
            temperature: Some(0.5),
            stop_sequences: None,
            tools: None,
            stream: false,
        }
    }

    #[test]
    fn test_adapter_name() {
        assert_eq!(make_adapter().name(), "google");
    }

    #[test]
    fn test_url_shape() {
        let adapter = make_adapter().with_base_url("http://localhost:9090".to_string());
        assert_eq!(
            adapter.url("gemini-2.0-flash", "generateContent"),
            "http://localhost:9090/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_to_wire_request_roles_and_system() {
        let mut request = basic_request();
        request.messages.push(Message::assistant("Hi!"));

        let wire = GoogleAdapter::to_wire_request(&request);
        assert_eq!(wire.contents.len(), 2);
        assert_eq!(wire.contents[0].role.as_deref(), Some("user"));
        assert_eq!(wire.contents[1].role.as_deref(), Some("model"));
        let system = wire.system_instruction.unwrap();
        assert_eq!(system.parts[0].text.as_deref(), Some("Be helpful"));
        assert_eq!(
            wire.generation_config.as_ref().unwrap().max_output_tokens,
            Some(1024)
        );
    }

    #[test]
    fn test_tool_result_becomes_function_response() {
        let mut request = basic_request();
        request.messages.push(Message {
            role: MessageRole::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: None,
                name: "list_files".to_string(),
                content: "a.rs, b.rs".to_string(),
            }],
        });

        let wire = GoogleAdapter::to_wire_request(&request);
        let last = wire.contents.last().unwrap();
        assert_eq!(last.role.as_deref(), Some("user"));
        let fr = last.parts[0].function_response.as_ref().unwrap();
        assert_eq!(fr.name, "list_files");
        assert_eq!(fr.response["result"], "a.rs, b.rs");
    }

    #[test]
    fn test_tool_definitions_translate_to_declarations() {
        let mut request = basic_request();
        request.tools = Some(vec![palaver_types::chat::ToolDefinition {
            name: "search".to_string(),
            description: "Web search".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }]);

        let wire = GoogleAdapter::to_wire_request(&request);
        let tools = wire.tools.unwrap();
        assert_eq!(tools[0].function_declarations[0].name, "search");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("STOP"), StopReason::EndTurn);
        assert_eq!(map_finish_reason("MAX_TOKENS"), StopReason::MaxTokens);
        assert_eq!(map_finish_reason("SAFETY"), StopReason::EndTurn);
    }

    #[test]
    fn test_response_from_wire_happy_path() {
        let wire = GenerateContentResponse {
            candidates: vec![GoogleCandidate {
                content: Some(GoogleContent {
                    role: Some("model".to_string()),
                    parts: vec![GooglePart::text("hello")],
                }),
                finish_reason: Some("STOP".to_string()),
            }],
            usage_metadata: Some(GoogleUsageMetadata {
                prompt_token_count: 9,
                candidates_token_count: 2,
            }),
            model_version: Some("gemini-2.0-flash-001".to_string()),
        };

        let response = response_from_wire(wire, "gemini-2.0-flash");
        assert_eq!(response.text, "hello");
        assert_eq!(response.model, "gemini-2.0-flash-001");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 9);
    }

    #[test]
    fn test_empty_candidates_map_to_empty_response() {
        let wire = GenerateContentResponse {
            candidates: vec![],
            usage_metadata: None,
            model_version: None,
        };

        let response = response_from_wire(wire, "gemini-2.0-flash");
        assert_eq!(response.text, "");
        assert_eq!(response.stop_reason, StopReason::Empty);
        assert_eq!(response.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_function_call_maps_to_tool_call() {
        let wire = GenerateContentResponse {
            candidates: vec![GoogleCandidate {
                content: Some(GoogleContent {
                    role: Some("model".to_string()),
                    parts: vec![GooglePart {
                        function_call: Some(GoogleFunctionCall {
                            name: "search".to_string(),
                            args: serde_json::json!({"q": "rust"}),
                        }),
                        ..Default::default()
                    }],
                }),
                finish_reason: Some("STOP".to_string()),
            }],
            usage_metadata: None,
            model_version: None,
        };

        let response = response_from_wire(wire, "gemini-2.0-flash");
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.tool_calls[0].id.is_none());
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;

        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            map_error_status(StatusCode::TOO_MANY_REQUESTS, body),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            map_error_status(StatusCode::FORBIDDEN, "{}"),
            GatewayError::AuthFailure
        ));
        match map_error_status(StatusCode::BAD_REQUEST, r#"{"error": {"message": "bad field"}}"#) {
            GatewayError::InvalidRequest(message) => assert_eq!(message, "bad field"),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
        assert!(matches!(
            map_error_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            GatewayError::Unavailable(_)
        ));
    }
}
