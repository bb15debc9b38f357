//! Streaming aggregator: tee a live event stream into a final response.
//!
//! [`AggregatingStream`] forwards events unmodified and in order for live
//! display while concurrently folding them into a [`ChatResponse`].
//! [`collect_response`] drains a stream and returns only the fold. Both
//! paths run the same [`ResponseAccumulator`], so a caller that watches
//! the live stream and one that waits for the aggregate always end up
//! with an identical response.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};

use palaver_types::chat::{ChatEvent, ChatResponse, StopReason, ToolCall, Usage};
use palaver_types::error::GatewayError;

use super::adapter::EventStream;

/// Partial tool call being assembled from `ToolCallDelta` fragments.
#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: Option<String>,
    json_buffer: String,
}

/// Append-only fold of a `ChatEvent` sequence.
///
/// Text deltas concatenate in arrival order; tool-call deltas accumulate
/// by call index and their JSON argument buffers parse once the stream
/// finishes; usage and stop reason latch from `UsageInfo` / `StopInfo`.
#[derive(Debug)]
pub struct ResponseAccumulator {
    model: String,
    text: String,
    tool_builders: BTreeMap<u32, ToolCallBuilder>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl ResponseAccumulator {
    /// Start an empty fold for a response from `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            text: String::new(),
            tool_builders: BTreeMap::new(),
            usage: Usage::default(),
            stop_reason: None,
        }
    }

    /// Fold one event. Terminal markers are ignored here; the caller
    /// decides what a terminal means (see [`AggregatingStream`]).
    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::TextDelta { text, .. } => self.text.push_str(text),
            ChatEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments_fragment,
            } => {
                let builder = self.tool_builders.entry(*index).or_default();
                if let Some(id) = id {
                    builder.id = Some(id.clone());
                }
                if let Some(name) = name {
                    builder.name = Some(name.clone());
                }
                builder.json_buffer.push_str(arguments_fragment);
            }
            ChatEvent::UsageInfo(usage) => self.usage.merge(usage),
            ChatEvent::StopInfo { stop_reason } => self.stop_reason = Some(*stop_reason),
            ChatEvent::Done | ChatEvent::Cancelled => {}
        }
    }

    /// Close the fold into a response.
    ///
    /// Fails with `ProtocolViolation` when a tool call never received a
    /// name or its argument buffer is not valid JSON -- the provider sent
    /// an incoherent stream and the caller must not see half a call.
    pub fn finish(self) -> Result<ChatResponse, GatewayError> {
        let mut tool_calls = Vec::with_capacity(self.tool_builders.len());
        for (index, builder) in self.tool_builders {
            let name = builder.name.ok_or_else(|| {
                GatewayError::ProtocolViolation(format!("tool call {index} missing a name"))
            })?;
            let arguments = if builder.json_buffer.is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&builder.json_buffer).map_err(|e| {
                    GatewayError::ProtocolViolation(format!(
                        "tool call '{name}' arguments are not valid JSON: {e}"
                    ))
                })?
            };
            tool_calls.push(ToolCall {
                id: builder.id,
                name,
                arguments,
            });
        }

        let has_content = !self.text.is_empty() || !tool_calls.is_empty();
        let stop_reason = match (self.stop_reason, has_content) {
            // A well-formed but contentless response reads as empty even
            // when the provider claimed an ordinary end of turn.
            (Some(StopReason::EndTurn) | None, false) => StopReason::Empty,
            (Some(reason), _) => reason,
            (None, true) if !tool_calls.is_empty() => StopReason::ToolUse,
            (None, true) => StopReason::EndTurn,
        };

        Ok(ChatResponse {
            model: self.model,
            text: self.text,
            tool_calls,
            stop_reason,
            usage: self.usage,
        })
    }
}

/// How an aggregated stream ended.
#[derive(Debug)]
enum Terminal {
    Pending,
    Done,
    Cancelled,
    Failed(GatewayError),
}

/// A pass-through stream that folds everything it forwards.
///
/// Yields exactly the items of the wrapped stream, in order. Once the
/// stream has delivered its terminal item, [`into_response`] returns the
/// folded [`ChatResponse`] (or the terminal error).
///
/// [`into_response`]: AggregatingStream::into_response
pub struct AggregatingStream {
    inner: EventStream,
    acc: ResponseAccumulator,
    terminal: Terminal,
}

impl AggregatingStream {
    /// Wrap an event stream, folding toward a response from `model`.
    pub fn new(inner: EventStream, model: impl Into<String>) -> Self {
        Self {
            inner,
            acc: ResponseAccumulator::new(model),
            terminal: Terminal::Pending,
        }
    }

    /// Whether the wrapped stream has delivered its terminal item.
    pub fn is_finished(&self) -> bool {
        !matches!(self.terminal, Terminal::Pending)
    }

    /// Consume the aggregator and produce the folded terminal outcome.
    ///
    /// Mirrors what the live consumer saw: `Done` folds into a response,
    /// cancellation becomes `GatewayError::Cancelled`, a failed stream
    /// returns its terminal error. Calling this before the stream has
    /// finished is a caller bug and reports `InvalidRequest`.
    pub fn into_response(self) -> Result<ChatResponse, GatewayError> {
        match self.terminal {
            Terminal::Done => self.acc.finish(),
            Terminal::Cancelled => Err(GatewayError::Cancelled),
            Terminal::Failed(err) => Err(err),
            Terminal::Pending => Err(GatewayError::InvalidRequest(
                "stream aggregated before it finished".to_string(),
            )),
        }
    }
}

impl Stream for AggregatingStream {
    type Item = Result<ChatEvent, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.is_finished() {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(event))) => {
                this.acc.apply(&event);
                match event {
                    ChatEvent::Done => this.terminal = Terminal::Done,
                    ChatEvent::Cancelled => this.terminal = Terminal::Cancelled,
                    _ => {}
                }
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.terminal = Terminal::Failed(err.clone());
                Poll::Ready(Some(Err(err)))
            }
            // Adapter streams promise a terminal item; a bare end means
            // the promise was broken upstream.
            Poll::Ready(None) => {
                let err = GatewayError::ProtocolViolation(
                    "stream ended without a terminal event".to_string(),
                );
                this.terminal = Terminal::Failed(err.clone());
                Poll::Ready(Some(Err(err)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Drain a stream and return only the folded final response.
pub async fn collect_response(
    stream: EventStream,
    model: impl Into<String>,
) -> Result<ChatResponse, GatewayError> {
    let mut aggregating = AggregatingStream::new(stream, model);
    while let Some(item) = aggregating.next().await {
        // Live items are discarded; the fold keeps everything relevant.
        // A terminal error still has to short-circuit so the caller sees
        // exactly one outcome.
        if let Err(err) = item {
            return Err(err);
        }
    }
    aggregating.into_response()
}
