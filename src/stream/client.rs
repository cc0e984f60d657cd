//! Server-push event stream receiver.
//!
//! [`EventStream`] opens the push connection and yields decoded events as the
//! consumer asks for them. One physical read may surface zero or more
//! buffered events; delivery follows wire arrival order.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::cancel::{ActiveScope, IdleTimer, ScopeSlot};
use crate::client::{http_status_error, ErrorHook, MessageHook, TransportError};
use crate::stream::frame::{classify_payload, frame_payload, DecodedEvent, FrameBuffer};

/// Per-call options for [`crate::client::PushClient::open_stream`].
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    /// Per-call headers; win over configured defaults on conflict.
    pub headers: HeaderMap,
    /// Idle timeout override; the instance default applies when unset.
    pub timeout: Option<Duration>,
}

/// Everything the receiver needs to open a stream, prepared by the client.
pub(crate) struct StreamSetup {
    pub http: Client,
    pub url: String,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub slot: Arc<ScopeSlot>,
    pub on_message: Option<MessageHook>,
    pub on_error: Option<ErrorHook>,
}

/// Lazy, finite sequence of decoded push-stream events.
///
/// The sequence is non-restartable; once it ends or fails it stays exhausted.
/// Dropping it releases the idle timer and the cancellation scope.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<DecodedEvent, TransportError>> + Send>>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl EventStream {
    /// Opens the push connection and validates the initial response.
    ///
    /// The cancellation scope and idle timer are live from before the GET is
    /// issued, so a stalled connect is aborted like any other silence.
    pub(crate) async fn open(setup: StreamSetup) -> Result<Self, TransportError> {
        let StreamSetup {
            http,
            url,
            headers,
            timeout,
            slot,
            on_message,
            on_error,
        } = setup;

        let scope = ActiveScope::begin(slot);
        let token = scope.token();
        let mut timer = IdleTimer::new(token.clone(), timeout);
        timer.arm();

        let request = http.get(&url).headers(headers);
        let response = tokio::select! {
            () = token.cancelled() => return Err(TransportError::Aborted),
            result = request.send() => {
                result.map_err(|err| TransportError::from_reqwest(err, &token))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(http_status_error(response).await);
        }
        if status == StatusCode::NO_CONTENT {
            return Err(TransportError::NoResponseBody);
        }
        debug!(
            event = "stream_opened",
            url = %url,
            timeout_ms = timeout.as_millis() as u64
        );

        let mut body = Box::pin(response.bytes_stream());
        let inner = try_stream! {
            // The scope guard and timer live inside the generator so every
            // termination path, including the consumer dropping the stream,
            // releases them.
            let _scope = scope;
            let mut buffer = FrameBuffer::new();
            loop {
                let step = tokio::select! {
                    () = token.cancelled() => Err(TransportError::Aborted),
                    chunk = body.next() => match chunk {
                        None => Ok(None),
                        Some(result) => result
                            .map(Some)
                            .map_err(|err| TransportError::from_reqwest(err, &token)),
                    },
                };
                let maybe_bytes = step.map_err(|err| {
                    debug!(event = "stream_failed", error = %err);
                    notify(&on_error, &err);
                    err
                })?;
                let Some(bytes) = maybe_bytes else {
                    debug!(event = "stream_ended");
                    break;
                };

                buffer.push_chunk(&bytes);
                for frame in buffer.take_frames() {
                    let Some(payload) = frame_payload(&frame) else {
                        continue;
                    };
                    let event = classify_payload(payload);
                    if let (DecodedEvent::StructuredMessage(value), Some(hook)) =
                        (&event, on_message.as_ref())
                    {
                        hook(value);
                    }
                    timer.arm();
                    yield event;
                }
            }
        };

        Ok(Self {
            inner: Box::pin(inner),
        })
    }

    /// Receives the next decoded event.
    ///
    /// Returns `None` once the sequence has terminated.
    pub async fn next_event(&mut self) -> Option<Result<DecodedEvent, TransportError>> {
        self.inner.next().await
    }
}

impl Stream for EventStream {
    type Item = Result<DecodedEvent, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn notify(hook: &Option<ErrorHook>, err: &TransportError) {
    if let Some(hook) = hook.as_ref() {
        hook(err);
    }
}
