//! SSE stream creation and event mapping for the Anthropic Messages API.
//!
//! Implements the streaming protocol described in the Anthropic docs:
//! 1. `message_start` -- message object with initial usage
//! 2. Per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` -- stop_reason and cumulative usage
//! 4. `message_stop` -- final event
//! 5. `ping` events may appear anywhere (keepalive)
//! 6. `error` events may appear mid-stream
//!
//! Tool use input arrives as partial JSON fragments via `input_json_delta`;
//! they pass through as `ToolCallDelta` fragments keyed by content block
//! index, and the aggregator assembles them.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use palaver_core::adapter::EventStream;
use palaver_types::chat::{ChatEvent, StopReason, Usage};
use palaver_types::error::GatewayError;

use super::client::{AnthropicAdapter, map_error_status, map_transport_error, retry_after_ms};
use super::types::{
    AnthropicContentBlock, AnthropicDelta, AnthropicRequest, ContentBlockDeltaPayload,
    ContentBlockStartPayload, ErrorPayload, MessageDeltaPayload, MessageStartPayload,
};

/// Map one SSE event (type string + JSON data) to zero or more
/// normalized [`ChatEvent`]s.
///
/// A malformed payload is a protocol violation that terminates the
/// stream; the raw payload is logged for diagnosis and only a short
/// description reaches the error itself.
fn process_event(event_type: &str, json_data: &str) -> Result<Vec<ChatEvent>, GatewayError> {
    let mut events = Vec::new();

    match event_type {
        "message_start" => {
            let payload: MessageStartPayload = parse_payload(event_type, json_data)?;
            tracing::debug!(
                message_id = %payload.message.id,
                model = %payload.message.model,
                "stream opened"
            );
            if let Some(usage) = payload.message.usage {
                events.push(ChatEvent::UsageInfo(Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                }));
            }
        }

        "content_block_start" => {
            let payload: ContentBlockStartPayload = parse_payload(event_type, json_data)?;
            match payload.content_block {
                AnthropicContentBlock::Text { text } => {
                    if !text.is_empty() {
                        events.push(ChatEvent::TextDelta {
                            index: payload.index,
                            text,
                        });
                    }
                }
                AnthropicContentBlock::ToolUse { id, name, .. } => {
                    events.push(ChatEvent::ToolCallDelta {
                        index: payload.index,
                        id: Some(id),
                        name: Some(name),
                        arguments_fragment: String::new(),
                    });
                }
            }
        }

        "content_block_delta" => {
            let payload: ContentBlockDeltaPayload = parse_payload(event_type, json_data)?;
            match payload.delta {
                AnthropicDelta::TextDelta { text } => {
                    events.push(ChatEvent::TextDelta {
                        index: payload.index,
                        text,
                    });
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    events.push(ChatEvent::ToolCallDelta {
                        index: payload.index,
                        id: None,
                        name: None,
                        arguments_fragment: partial_json,
                    });
                }
                AnthropicDelta::ThinkingDelta { .. } | AnthropicDelta::SignatureDelta { .. } => {
                    // Reasoning traces have no counterpart in the
                    // normalized contract.
                    tracing::debug!(index = payload.index, "skipping reasoning delta");
                }
            }
        }

        "content_block_stop" => {
            // Block boundaries are implicit in the normalized stream.
        }

        "message_delta" => {
            let payload: MessageDeltaPayload = parse_payload(event_type, json_data)?;
            events.push(ChatEvent::UsageInfo(Usage {
                input_tokens: payload.usage.input_tokens,
                output_tokens: payload.usage.output_tokens,
            }));
            if let Some(stop_reason) = payload
                .delta
                .stop_reason
                .as_deref()
                .and_then(|s| s.parse::<StopReason>().ok())
            {
                events.push(ChatEvent::StopInfo { stop_reason });
            }
        }

        "message_stop" => {
            events.push(ChatEvent::Done);
        }

        "ping" => {
            // Keepalive -- ignore
        }

        "error" => {
            let payload: ErrorPayload = parse_payload(event_type, json_data)?;
            return Err(map_stream_error(payload));
        }

        unknown => {
            tracing::debug!(event_type = unknown, "unknown Anthropic event type, skipping");
        }
    }

    Ok(events)
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    event_type: &str,
    json_data: &str,
) -> Result<T, GatewayError> {
    serde_json::from_str(json_data).map_err(|e| {
        tracing::warn!(
            event_type,
            payload = json_data,
            error = %e,
            "malformed Anthropic stream payload"
        );
        GatewayError::ProtocolViolation(format!("{event_type} payload: {e}"))
    })
}

fn map_stream_error(payload: ErrorPayload) -> GatewayError {
    match payload.error.error_type.as_str() {
        "overloaded_error" | "api_error" => GatewayError::Unavailable(payload.error.message),
        "rate_limit_error" => GatewayError::RateLimited {
            retry_after_ms: None,
        },
        "authentication_error" | "permission_error" => GatewayError::AuthFailure,
        "invalid_request_error" | "not_found_error" => {
            GatewayError::InvalidRequest(payload.error.message)
        }
        _ => GatewayError::Unknown(payload.error.message),
    }
}

/// Create a streaming SSE connection to the Anthropic Messages API.
///
/// Returns a stream of normalized [`ChatEvent`]s terminated by exactly
/// one `Done` or one error. Dropping the stream drops the response body,
/// which aborts the transfer and returns the connection.
pub fn create_anthropic_stream(
    client: &reqwest::Client,
    url: &str,
    body: AnthropicRequest,
    api_key: &SecretString,
) -> EventStream {
    let client = client.clone();
    let url = url.to_string();
    let api_key = api_key.expose_secret().to_string();

    Box::pin(async_stream::try_stream! {
        let response = client
            .post(&url)
            .header("x-api-key", &api_key)
            .header("anthropic-version", AnthropicAdapter::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %error_body, "Anthropic stream API error response");
            Err(map_error_status(status, retry_after, &error_body))?;
            unreachable!()
        }

        let mut sse = response.bytes_stream().eventsource();
        let mut saw_terminal = false;

        while let Some(event) = sse.next().await {
            let event = event
                .map_err(|e| GatewayError::Unavailable(format!("event stream: {e}")))?;

            for chat_event in process_event(&event.event, &event.data)? {
                let terminal = chat_event.is_terminal();
                yield chat_event;
                if terminal {
                    saw_terminal = true;
                    break;
                }
            }
            if saw_terminal {
                break;
            }
        }

        if !saw_terminal {
            Err(GatewayError::ProtocolViolation(
                "event stream ended before message_stop".to_string(),
            ))?;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_start_yields_usage() {
        let json = r#"{"type":"message_start","message":{"id":"msg_123","model":"model-x","usage":{"input_tokens":100,"output_tokens":0}}}"#;
        let events = process_event("message_start", json).unwrap();
        assert_eq!(
            events,
            vec![ChatEvent::UsageInfo(Usage {
                input_tokens: 100,
                output_tokens: 0
            })]
        );
    }

    #[test]
    fn test_text_delta_maps_through() {
        let json =
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        let events = process_event("content_block_delta", json).unwrap();
        assert_eq!(
            events,
            vec![ChatEvent::TextDelta {
                index: 0,
                text: "Hi".to_string()
            }]
        );
    }

    #[test]
    fn test_tool_use_start_carries_id_and_name() {
        let json = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search","input":{}}}"#;
        let events = process_event("content_block_start", json).unwrap();
        assert_eq!(
            events,
            vec![ChatEvent::ToolCallDelta {
                index: 1,
                id: Some("toolu_1".to_string()),
                name: Some("search".to_string()),
                arguments_fragment: String::new(),
            }]
        );
    }

    #[test]
    fn test_input_json_delta_becomes_fragment() {
        let json = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#;
        let events = process_event("content_block_delta", json).unwrap();
        assert_eq!(
            events,
            vec![ChatEvent::ToolCallDelta {
                index: 1,
                id: None,
                name: None,
                arguments_fragment: "{\"q\":".to_string(),
            }]
        );
    }

    #[test]
    fn test_thinking_delta_is_skipped() {
        let json = r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#;
        let events = process_event("content_block_delta", json).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_message_delta_yields_usage_and_stop() {
        let json = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":0,"output_tokens":42}}"#;
        let events = process_event("message_delta", json).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ChatEvent::UsageInfo(Usage {
                input_tokens: 0,
                output_tokens: 42
            })
        );
        assert_eq!(
            events[1],
            ChatEvent::StopInfo {
                stop_reason: StopReason::EndTurn
            }
        );
    }

    #[test]
    fn test_message_stop_is_done() {
        let events = process_event("message_stop", r#"{"type":"message_stop"}"#).unwrap();
        assert_eq!(events, vec![ChatEvent::Done]);
    }

    #[test]
    fn test_ping_and_block_stop_yield_nothing() {
        assert!(process_event("ping", r#"{"type":"ping"}"#).unwrap().is_empty());
        assert!(
            process_event("content_block_stop", r#"{"type":"content_block_stop","index":0}"#)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_error_event_terminates_with_mapped_error() {
        let json = r#"{"error":{"type":"authentication_error","message":"Invalid API key"}}"#;
        let err = process_event("error", json).unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailure));

        let json = r#"{"error":{"type":"overloaded_error","message":"busy"}}"#;
        let err = process_event("error", json).unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));

        let json = r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#;
        let err = process_event("error", json).unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[test]
    fn test_malformed_payload_is_a_protocol_violation() {
        let err = process_event("message_delta", "{not json").unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
    }

    #[test]
    fn test_unknown_event_type_is_skipped() {
        let events = process_event("someday_maybe", r#"{"type":"someday_maybe"}"#).unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_single_terminal_error() {
        let client = reqwest::Client::new();
        let body = AnthropicRequest {
            model: "model-x".to_string(),
            max_tokens: 16,
            messages: vec![],
            system: None,
            stream: true,
            temperature: None,
            stop_sequences: None,
            tools: None,
        };
        let key = SecretString::from("test-key-not-real");

        // Port 9 (discard) has no listener; the connect failure must come
        // back normalized, once, and end the stream.
        let mut stream =
            create_anthropic_stream(&client, "http://127.0.0.1:9/v1/messages", body, &key);
        let first = stream.next().await.unwrap();
        assert!(matches!(
            first,
            Err(GatewayError::Unavailable(_)) | Err(GatewayError::Timeout)
        ));
        assert!(stream.next().await.is_none());
    }
}
