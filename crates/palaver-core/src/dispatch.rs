//! Request dispatcher: one entry point, uniform lifecycle policy.
//!
//! `dispatch` resolves the adapter through the registry before any I/O,
//! then applies the configured per-request timeout, bounded exponential
//! retry for transient failures, and cooperative cancellation -- the same
//! way for every provider. Retry decisions are made here and nowhere
//! else.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use palaver_types::chat::{ChatEvent, ChatRequest, ChatResponse};
use palaver_types::config::DispatchConfig;
use palaver_types::error::GatewayError;

use super::adapter::EventStream;
use super::box_adapter::BoxChatAdapter;
use super::registry::ProviderRegistry;

/// Result of dispatching one request, shaped by its streaming flag.
pub enum DispatchOutcome {
    /// Full response from a non-streaming call.
    Response(ChatResponse),
    /// Live event sequence from a streaming call. Timeout, retry and
    /// cancellation policy are already applied inside.
    Stream(EventStream),
}

impl fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Response(response) => {
                f.debug_tuple("Response").field(response).finish()
            }
            DispatchOutcome::Stream(_) => f.debug_tuple("Stream").field(&"<stream>").finish(),
        }
    }
}

/// Orchestrates a single logical request through a resolved adapter.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    defaults: DispatchConfig,
    overrides: HashMap<String, DispatchConfig>,
}

impl Dispatcher {
    /// Create a dispatcher over a frozen registry with default policy.
    pub fn new(registry: Arc<ProviderRegistry>, defaults: DispatchConfig) -> Self {
        Self {
            registry,
            defaults,
            overrides: HashMap::new(),
        }
    }

    /// Override the dispatch policy for one provider.
    pub fn with_provider_config(
        mut self,
        provider: impl Into<String>,
        config: DispatchConfig,
    ) -> Self {
        self.overrides.insert(provider.into(), config);
        self
    }

    fn config_for(&self, provider: &str) -> &DispatchConfig {
        self.overrides.get(provider).unwrap_or(&self.defaults)
    }

    /// Dispatch a request without external cancellation.
    pub async fn dispatch(&self, request: ChatRequest) -> Result<DispatchOutcome, GatewayError> {
        self.dispatch_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Dispatch a request, honoring the caller's cancellation token.
    ///
    /// The adapter is resolved before any network I/O; routing errors
    /// surface immediately and are never retried. The token forms the
    /// caller end of the cooperative cancellation chain: once it fires,
    /// a non-streaming call returns `GatewayError::Cancelled`, a stream
    /// flushes already-buffered events (bounded by the configured grace
    /// period) and then ends with a `ChatEvent::Cancelled` marker.
    pub async fn dispatch_with_cancellation(
        &self,
        request: ChatRequest,
        cancellation: CancellationToken,
    ) -> Result<DispatchOutcome, GatewayError> {
        let adapter = Arc::clone(self.registry.resolve(&request.provider, &request.model)?);
        let config = self.config_for(&request.provider).clone();
        let request_id = Uuid::now_v7();

        let span = info_span!(
            "gen_ai.dispatch",
            request_id = %request_id,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %request.provider,
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = request.stream,
        );

        if request.stream {
            let stream = stream_with_policy(adapter, request, config, cancellation);
            Ok(DispatchOutcome::Stream(Box::pin(StreamInSpan {
                inner: stream,
                span,
            })))
        } else {
            send_with_policy(&adapter, &request, &config, &cancellation)
                .instrument(span)
                .await
                .map(DispatchOutcome::Response)
        }
    }
}

/// What a guarded wait produced.
enum Step<T> {
    Cancelled,
    DeadlineElapsed,
    Ready(T),
}

async fn guarded<F>(
    cancellation: &CancellationToken,
    deadline: tokio::time::Instant,
    fut: F,
) -> Step<F::Output>
where
    F: std::future::Future,
{
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => Step::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Step::DeadlineElapsed,
        out = fut => Step::Ready(out),
    }
}

/// Non-streaming path: timeout + bounded retry around `adapter.send`.
///
/// Dropping the in-flight send future on timeout or cancellation aborts
/// the adapter's HTTP request, which is the cancel signal the adapter
/// contract requires; partial work from an expired attempt is discarded.
async fn send_with_policy(
    adapter: &BoxChatAdapter,
    request: &ChatRequest,
    config: &DispatchConfig,
    cancellation: &CancellationToken,
) -> Result<ChatResponse, GatewayError> {
    let deadline = tokio::time::Instant::now() + config.request_timeout();
    let mut retry_hint_ms: Option<u64> = None;

    for attempt in 0..=config.retry.max_retries {
        if attempt > 0 {
            let mut delay = config.retry.delay_for_attempt(attempt - 1);
            if let Some(hint_ms) = retry_hint_ms.take() {
                delay = delay.max(Duration::from_millis(hint_ms));
            }
            match guarded(cancellation, deadline, tokio::time::sleep(delay)).await {
                Step::Cancelled => return Err(GatewayError::Cancelled),
                Step::DeadlineElapsed => return Err(GatewayError::Timeout),
                Step::Ready(()) => {}
            }
        }

        match guarded(cancellation, deadline, adapter.send(request)).await {
            Step::Cancelled => return Err(GatewayError::Cancelled),
            Step::DeadlineElapsed => return Err(GatewayError::Timeout),
            Step::Ready(Ok(response)) => {
                if attempt > 0 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(response);
            }
            Step::Ready(Err(err)) => {
                if !err.is_transient() || attempt == config.retry.max_retries {
                    return Err(err);
                }
                retry_hint_ms = err.retry_after_ms();
                warn!(
                    attempt = attempt + 1,
                    max_retries = config.retry.max_retries,
                    error = %err,
                    "transient failure, retrying"
                );
            }
        }
    }

    // The loop always returns from its final iteration.
    unreachable!("retry loop exited without a terminal outcome")
}

/// Streaming path: the returned stream enforces deadline, cancellation
/// and the never-retry-after-content rule while relaying adapter events
/// untouched and in order.
fn stream_with_policy(
    adapter: Arc<BoxChatAdapter>,
    request: ChatRequest,
    config: DispatchConfig,
    cancellation: CancellationToken,
) -> EventStream {
    Box::pin(async_stream::stream! {
        let deadline = tokio::time::Instant::now() + config.request_timeout();
        let mut attempt: u32 = 0;

        'attempts: loop {
            let mut inner = adapter.stream(request.clone());
            let mut delivered_content = false;

            loop {
                let step = guarded(&cancellation, deadline, inner.next()).await;
                match step {
                    Step::Cancelled => {
                        // Flush whatever the adapter already has ready,
                        // bounded by the grace period, then mark the
                        // stream cancelled. Dropping `inner` afterwards
                        // aborts the provider connection.
                        let grace_deadline =
                            tokio::time::Instant::now() + config.cancel_grace();
                        while let Some(Some(item)) = inner.next().now_or_never() {
                            match item {
                                Ok(event) if event.is_terminal() => break,
                                Ok(event) => yield Ok(event),
                                Err(_) => break,
                            }
                            if tokio::time::Instant::now() >= grace_deadline {
                                break;
                            }
                        }
                        debug!("stream cancelled by caller");
                        yield Ok(ChatEvent::Cancelled);
                        return;
                    }
                    Step::DeadlineElapsed => {
                        // Events already relayed stand; the stream itself
                        // ends with the timeout as its terminal error.
                        yield Err(GatewayError::Timeout);
                        return;
                    }
                    Step::Ready(Some(Ok(event))) => {
                        delivered_content |= event.is_content();
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            return;
                        }
                    }
                    Step::Ready(Some(Err(err)))
                        if err.is_transient()
                            && !delivered_content
                            && attempt < config.retry.max_retries =>
                    {
                        let mut delay = config.retry.delay_for_attempt(attempt);
                        if let Some(hint_ms) = err.retry_after_ms() {
                            delay = delay.max(Duration::from_millis(hint_ms));
                        }
                        attempt += 1;
                        warn!(
                            attempt,
                            max_retries = config.retry.max_retries,
                            error = %err,
                            "stream failed before content, retrying"
                        );
                        match guarded(&cancellation, deadline, tokio::time::sleep(delay)).await {
                            Step::Cancelled => {
                                yield Ok(ChatEvent::Cancelled);
                                return;
                            }
                            Step::DeadlineElapsed => {
                                yield Err(GatewayError::Timeout);
                                return;
                            }
                            Step::Ready(()) => {}
                        }
                        continue 'attempts;
                    }
                    Step::Ready(Some(Err(err))) => {
                        // Either terminal by classification, or content is
                        // already visible and a retry would duplicate it.
                        yield Err(err);
                        return;
                    }
                    Step::Ready(None) => {
                        yield Err(GatewayError::ProtocolViolation(
                            "stream ended without a terminal event".to_string(),
                        ));
                        return;
                    }
                }
            }
        }
    })
}

/// Keeps the dispatch span alive for the whole life of a stream.
///
/// Without this the span would close as soon as the stream was returned,
/// losing instrumentation for the actual streaming duration.
struct StreamInSpan {
    inner: EventStream,
    span: tracing::Span,
}

impl futures_util::Stream for StreamInSpan {
    type Item = Result<ChatEvent, GatewayError>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let _enter = this.span.enter();
        this.inner.poll_next_unpin(cx)
    }
}
