//! SSE stream creation and chunk mapping for `streamGenerateContent`.
//!
//! With `alt=sse` the API emits one SSE `data:` line per chunk, each a
//! complete [`GenerateContentResponse`] carrying incremental candidate
//! parts. There is no explicit end-of-stream sentinel: the final chunk
//! carries a `finishReason` and the transport then closes. A transport
//! close without a finish reason means the stream was cut mid-message.
//!
//! Function calls arrive whole in a single chunk (never fragmented), so
//! each becomes one `ToolCallDelta` carrying its full argument JSON.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use palaver_core::adapter::EventStream;
use palaver_types::chat::{ChatEvent, Usage};
use palaver_types::error::GatewayError;

use super::client::{map_error_status, map_finish_reason, map_transport_error};
use super::types::{GenerateContentRequest, GenerateContentResponse};

/// Running state for chunk mapping: Google does not index its parts, so
/// tool calls are numbered in arrival order.
#[derive(Default)]
struct ChunkState {
    next_tool_index: u32,
    saw_finish: bool,
}

/// Map one SSE chunk into zero or more normalized [`ChatEvent`]s.
fn process_chunk(json_data: &str, state: &mut ChunkState) -> Result<Vec<ChatEvent>, GatewayError> {
    let chunk: GenerateContentResponse = serde_json::from_str(json_data).map_err(|e| {
        tracing::warn!(payload = json_data, error = %e, "malformed Google stream chunk");
        GatewayError::ProtocolViolation(format!("stream chunk: {e}"))
    })?;

    let mut events = Vec::new();

    if let Some(candidate) = chunk.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        events.push(ChatEvent::TextDelta { index: 0, text });
                    }
                }
                if let Some(call) = part.function_call {
                    let index = state.next_tool_index;
                    state.next_tool_index += 1;
                    events.push(ChatEvent::ToolCallDelta {
                        index,
                        id: None,
                        name: Some(call.name),
                        arguments_fragment: call.args.to_string(),
                    });
                }
            }
        }
        if let Some(reason) = candidate.finish_reason.as_deref() {
            state.saw_finish = true;
            events.push(ChatEvent::StopInfo {
                stop_reason: map_finish_reason(reason),
            });
        }
    }

    if let Some(meta) = chunk.usage_metadata {
        events.push(ChatEvent::UsageInfo(Usage {
            input_tokens: meta.prompt_token_count,
            output_tokens: meta.candidates_token_count,
        }));
    }

    Ok(events)
}

/// Create a streaming SSE connection to `streamGenerateContent`.
///
/// Returns a stream of normalized [`ChatEvent`]s terminated by exactly
/// one `Done` or one error. Dropping the stream drops the response body,
/// which aborts the transfer and returns the connection.
pub fn create_google_stream(
    client: &reqwest::Client,
    url: &str,
    body: GenerateContentRequest,
    api_key: &SecretString,
) -> EventStream {
    let client = client.clone();
    let url = url.to_string();
    let api_key = api_key.expose_secret().to_string();

    Box::pin(async_stream::try_stream! {
        let response = client
            .post(&url)
            .header("x-goog-api-key", &api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %error_body, "Google stream API error response");
            Err(map_error_status(status, &error_body))?;
            unreachable!()
        }

        let mut sse = response.bytes_stream().eventsource();
        let mut state = ChunkState::default();

        while let Some(event) = sse.next().await {
            let event = event
                .map_err(|e| GatewayError::Unavailable(format!("event stream: {e}")))?;

            for chat_event in process_chunk(&event.data, &mut state)? {
                yield chat_event;
            }
        }

        if state.saw_finish {
            yield ChatEvent::Done;
        } else {
            Err(GatewayError::ProtocolViolation(
                "event stream ended before a finish reason".to_string(),
            ))?;
        }
    })
}
