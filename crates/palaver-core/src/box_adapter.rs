//! BoxChatAdapter -- object-safe dynamic dispatch wrapper for ChatAdapter.
//!
//! The registry selects adapters at runtime, so it needs trait objects:
//! 1. Define an object-safe `ChatAdapterDyn` trait with boxed futures
//! 2. Blanket-impl `ChatAdapterDyn` for all `T: ChatAdapter`
//! 3. `BoxChatAdapter` wraps `Box<dyn ChatAdapterDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use palaver_types::chat::{ChatRequest, ChatResponse};
use palaver_types::error::GatewayError;

use super::adapter::{ChatAdapter, EventStream};

/// Object-safe version of [`ChatAdapter`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation
/// covers every `ChatAdapter`.
pub trait ChatAdapterDyn: Send + Sync {
    fn name(&self) -> &str;

    fn send_boxed<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, GatewayError>> + Send + 'a>>;

    fn stream_boxed(&self, request: ChatRequest) -> EventStream;
}

impl<T: ChatAdapter> ChatAdapterDyn for T {
    fn name(&self) -> &str {
        ChatAdapter::name(self)
    }

    fn send_boxed<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, GatewayError>> + Send + 'a>> {
        Box::pin(self.send(request))
    }

    fn stream_boxed(&self, request: ChatRequest) -> EventStream {
        self.stream(request)
    }
}

/// Type-erased chat adapter for runtime provider selection.
///
/// Since `ChatAdapter` uses RPITIT it cannot be a trait object directly;
/// `BoxChatAdapter` provides equivalent methods delegating to the inner
/// `ChatAdapterDyn` object.
pub struct BoxChatAdapter {
    inner: Box<dyn ChatAdapterDyn + Send + Sync>,
}

impl std::fmt::Debug for BoxChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxChatAdapter")
            .field("name", &self.inner.name())
            .finish()
    }
}

impl BoxChatAdapter {
    /// Wrap a concrete `ChatAdapter` in a type-erased box.
    pub fn new<T: ChatAdapter + 'static>(adapter: T) -> Self {
        Self {
            inner: Box::new(adapter),
        }
    }

    /// Logical provider name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Perform one round trip and return the full response.
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        self.inner.send_boxed(request).await
    }

    /// Initiate a streaming completion.
    pub fn stream(&self, request: ChatRequest) -> EventStream {
        self.inner.stream_boxed(request)
    }
}
