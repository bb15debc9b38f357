//! ChatAdapter trait definition.
//!
//! This is the capability every provider backend implements. Uses RPITIT
//! for `send`, and `Pin<Box<dyn Stream>>` for `stream` (streams need to
//! be object-safe for the [`BoxChatAdapter`](crate::box_adapter::BoxChatAdapter)
//! wrapper).

use std::pin::Pin;

use futures_util::Stream;

use palaver_types::chat::{ChatEvent, ChatRequest, ChatResponse};
use palaver_types::error::GatewayError;

/// A lazy, finite, non-restartable sequence of stream events.
///
/// Terminated by exactly one `Ok(ChatEvent::Done)`, one
/// `Ok(ChatEvent::Cancelled)`, or one `Err` -- never more than one
/// terminal item, never zero. Dropping it aborts the underlying
/// transfer and releases the adapter's connection resources.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<ChatEvent, GatewayError>> + Send + 'static>>;

/// Trait for provider backends (Anthropic, Google, etc.).
///
/// Implementations are stateless across requests apart from the
/// connection pool they own exclusively; every request acquires its own
/// request-scoped resources and releases them on every exit path.
/// All failures leave the adapter already normalized into
/// [`GatewayError`] -- no provider error type crosses this boundary.
///
/// Implementations live in `palaver-infra`.
pub trait ChatAdapter: Send + Sync {
    /// Logical provider name (e.g., "anthropic", "google").
    fn name(&self) -> &str;

    /// Perform one blocking round trip and return the full response.
    fn send(
        &self,
        request: &ChatRequest,
    ) -> impl std::future::Future<Output = Result<ChatResponse, GatewayError>> + Send;

    /// Initiate a streaming completion. Returns a stream of events.
    ///
    /// Returns a boxed stream (not RPITIT) because streams need to be
    /// object-safe for the `BoxChatAdapter` wrapper.
    fn stream(&self, request: ChatRequest) -> EventStream;
}
