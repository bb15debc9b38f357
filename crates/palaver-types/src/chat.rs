//! Normalized chat contract for the Palaver gateway.
//!
//! These types model the provider-agnostic data shapes that cross the
//! gateway boundary: chat requests, streamed events, and terminal
//! responses. Provider adapters translate to and from their own wire
//! formats; none of their field names appear here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// One ordered part of a message's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },

    /// A tool invocation requested by the assistant.
    ToolCall(ToolCall),

    /// The result of a tool invocation, sent back by the caller.
    ToolResult {
        /// Id of the tool call this result answers, when the provider
        /// issued one.
        tool_call_id: Option<String>,
        /// Name of the tool that ran.
        name: String,
        /// Tool output, serialized.
        content: String,
    },
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
}

impl Message {
    /// A plain-text message with the given role.
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// A plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(MessageRole::User, text)
    }

    /// A plain-text assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, text)
    }

    /// Concatenated text of all `Text` parts, in order.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A tool the model may invoke, described to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input object.
    pub input_schema: serde_json::Value,
}

/// A completed tool invocation in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-issued call id. Not every provider issues one.
    pub id: Option<String>,
    pub name: String,
    /// Fully parsed input arguments.
    pub arguments: serde_json::Value,
}

/// Request for a chat completion, routed to one provider adapter.
///
/// Immutable once constructed; the dispatcher clones it per retry attempt
/// but never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Logical provider name the registry resolves (e.g., "anthropic").
    pub provider: String,
    /// Target model identifier.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub stream: bool,
}

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    /// The provider returned a well-formed response with no content.
    Empty,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
            StopReason::Empty => write!(f, "empty"),
        }
    }
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "end_turn" => Ok(StopReason::EndTurn),
            "tool_use" => Ok(StopReason::ToolUse),
            "max_tokens" => Ok(StopReason::MaxTokens),
            "stop_sequence" => Ok(StopReason::StopSequence),
            "empty" => Ok(StopReason::Empty),
            other => Err(format!("invalid stop reason: '{other}'")),
        }
    }
}

/// Token usage for a request/response pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Fold another usage report into this one.
    ///
    /// Providers report usage incrementally (input tokens when the stream
    /// opens, output tokens when it closes), so later events overwrite
    /// only the fields they actually carry.
    pub fn merge(&mut self, other: &Usage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }
}

/// One incremental unit of a streamed response.
///
/// Adapters produce these in arrival order; the aggregator and dispatcher
/// must never reorder or silently drop them. The stream item type is
/// `Result<ChatEvent, GatewayError>` -- an `Err` item is the stream's
/// terminal error event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A fragment of assistant text.
    TextDelta { index: u32, text: String },

    /// A fragment of a tool invocation. `id` and `name` arrive on the
    /// first fragment for a given call index; `arguments_fragment`
    /// pieces concatenate into a JSON document.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },

    /// Token usage information.
    UsageInfo(Usage),

    /// The stop reason the final response will report.
    StopInfo { stop_reason: StopReason },

    /// The stream completed normally.
    Done,

    /// The stream was cancelled by the caller. Terminal, replaces
    /// `Done`; emitted after any already-buffered events are flushed.
    Cancelled,
}

impl ChatEvent {
    /// Whether this event carries content visible to the caller.
    ///
    /// The dispatcher never retries a stream once a content event has
    /// been delivered.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            ChatEvent::TextDelta { .. } | ChatEvent::ToolCallDelta { .. }
        )
    }

    /// Whether this event terminates its stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done | ChatEvent::Cancelled)
    }
}

/// Normalized terminal result of a chat request.
///
/// Returned directly by non-streaming adapters, or folded from a
/// `ChatEvent` sequence by the aggregator. Both paths must agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_stop_reason_roundtrip() {
        for reason in [
            StopReason::EndTurn,
            StopReason::ToolUse,
            StopReason::MaxTokens,
            StopReason::StopSequence,
            StopReason::Empty,
        ] {
            let s = reason.to_string();
            let parsed: StopReason = s.parse().unwrap();
            assert_eq!(reason, parsed);
        }
    }

    #[test]
    fn test_stop_reason_serde() {
        let json = serde_json::to_string(&StopReason::Empty).unwrap();
        assert_eq!(json, "\"empty\"");
        let parsed: StopReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, StopReason::Empty);
    }

    #[test]
    fn test_message_joined_text_skips_tool_parts() {
        let message = Message {
            role: MessageRole::Assistant,
            content: vec![
                ContentPart::Text {
                    text: "Let me check".to_string(),
                },
                ContentPart::ToolCall(ToolCall {
                    id: Some("call_1".to_string()),
                    name: "search".to_string(),
                    arguments: serde_json::json!({"q": "rust"}),
                }),
                ContentPart::Text {
                    text: " that.".to_string(),
                },
            ],
        };
        assert_eq!(message.joined_text(), "Let me check that.");
    }

    #[test]
    fn test_chat_event_content_classification() {
        assert!(ChatEvent::TextDelta {
            index: 0,
            text: "hi".to_string()
        }
        .is_content());
        assert!(ChatEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments_fragment: "{".to_string()
        }
        .is_content());
        assert!(!ChatEvent::UsageInfo(Usage::default()).is_content());
        assert!(!ChatEvent::Done.is_content());
    }

    #[test]
    fn test_chat_event_terminal_classification() {
        assert!(ChatEvent::Done.is_terminal());
        assert!(ChatEvent::Cancelled.is_terminal());
        assert!(!ChatEvent::StopInfo {
            stop_reason: StopReason::EndTurn
        }
        .is_terminal());
    }

    #[test]
    fn test_chat_event_serde_shape() {
        let event = ChatEvent::TextDelta {
            index: 0,
            text: "Hello".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "Hello");
    }

    #[test]
    fn test_usage_merge_keeps_nonzero_fields() {
        let mut usage = Usage {
            input_tokens: 120,
            output_tokens: 0,
        };
        usage.merge(&Usage {
            input_tokens: 0,
            output_tokens: 45,
        });
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 45);
    }

    #[test]
    fn test_chat_request_optional_fields_skipped() {
        let request = ChatRequest {
            provider: "anthropic".to_string(),
            model: "model-x".to_string(),
            messages: vec![Message::user("hi")],
            system: None,
            max_tokens: 1024,
            temperature: None,
            stop_sequences: None,
            tools: None,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], false);
    }
}
