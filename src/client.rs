//! HTTP client for the push transport: endpoint lifecycle, unary message
//! delivery, and generic one-shot requests.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::{ActiveScope, IdleTimer, ScopeSlot};
use crate::stream::client::{EventStream, StreamOptions, StreamSetup};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Path segment appended to the base address for unary message delivery.
const MESSAGES_PATH: &str = "messages";

/// Default tuning values for [`PushClientOptions`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PushClientDefaults;

impl PushClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const FOLLOW_REDIRECTS: bool = true;
}

/// Configuration for [`PushClient`].
#[derive(Clone, Debug)]
pub struct PushClientOptions {
    /// TCP connect timeout for every outbound request.
    pub connect_timeout: Duration,
    /// Default idle timeout applied when a call does not override it.
    pub idle_timeout: Duration,
    /// Headers merged into every outbound request.
    pub default_headers: HeaderMap,
    /// Whether redirects are followed or refused.
    pub follow_redirects: bool,
}

impl Default for PushClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: PushClientDefaults::CONNECT_TIMEOUT,
            idle_timeout: PushClientDefaults::IDLE_TIMEOUT,
            default_headers: HeaderMap::new(),
            follow_redirects: PushClientDefaults::FOLLOW_REDIRECTS,
        }
    }
}

/// Hook invoked with every message-shaped payload decoded from the stream.
pub type MessageHook = Arc<dyn Fn(&Value) + Send + Sync>;
/// Hook notified best-effort before a surfaced error propagates.
pub type ErrorHook = Arc<dyn Fn(&TransportError) + Send + Sync>;
/// Hook invoked on every [`PushClient::close`] call.
pub type CloseHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub on_close: Option<CloseHook>,
    pub on_error: Option<ErrorHook>,
    pub on_message: Option<MessageHook>,
}

/// Client for the push transport.
///
/// One instance tracks a single cancellable operation at a time; overlapping
/// `request`/`open_stream` calls on the same instance overwrite the tracked
/// scope and are not protected further.
pub struct PushClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
    idle_timeout: Duration,
    endpoint: Mutex<Option<Url>>,
    scope: Arc<ScopeSlot>,
    hooks: Hooks,
}

impl PushClient {
    /// Creates a client with default options.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_options(base_url, PushClientOptions::default())
    }

    /// Creates a client with explicit options.
    pub fn with_options(
        base_url: impl Into<String>,
        options: PushClientOptions,
    ) -> Result<Self, TransportError> {
        let redirect = if options.follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .redirect(redirect)
            .build()
            .map_err(TransportError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            default_headers: options.default_headers,
            idle_timeout: options.idle_timeout,
            endpoint: Mutex::new(None),
            scope: Arc::new(ScopeSlot::new()),
            hooks: Hooks::default(),
        })
    }

    /// Registers a hook invoked with every decoded structured message.
    ///
    /// Hooks must be registered before startup; they are held for the
    /// instance's lifetime.
    pub fn with_on_message(mut self, hook: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.hooks.on_message = Some(Arc::new(hook));
        self
    }

    /// Registers a hook notified before surfaced errors propagate.
    pub fn with_on_error(
        mut self,
        hook: impl Fn(&TransportError) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Registers a hook invoked on every [`PushClient::close`] call.
    pub fn with_on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_close = Some(Arc::new(hook));
        self
    }

    /// Resolves the unary send endpoint from the configured base address.
    ///
    /// Calling `start` again simply re-resolves the endpoint.
    pub fn start(&self) -> Result<(), TransportError> {
        match resolve_endpoint(&self.base_url) {
            Ok(endpoint) => {
                debug!(event = "endpoint_resolved", endpoint = %endpoint);
                if let Ok(mut guard) = self.endpoint.lock() {
                    *guard = Some(endpoint);
                }
                Ok(())
            }
            Err(err) => {
                self.notify_error(&err);
                Err(err)
            }
        }
    }

    /// Cancels the currently tracked scope and invokes the close hook.
    ///
    /// Each call invokes the hook again; there is no already-closed guard.
    pub fn close(&self) {
        self.scope.cancel_active();
        if let Some(hook) = self.hooks.on_close.as_ref() {
            hook();
        }
    }

    /// Returns the resolved send endpoint, if [`PushClient::start`] has run.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.lock().ok().and_then(|guard| guard.clone())
    }

    /// Delivers one message to the resolved endpoint.
    ///
    /// Fire-and-forget: a 2xx response discards the body. Failures are
    /// reported to the error hook and propagated; there is no retry.
    pub async fn send(&self, message: &Value) -> Result<(), TransportError> {
        let result = self.send_inner(message).await;
        if let Err(err) = &result {
            self.notify_error(err);
        }
        result
    }

    async fn send_inner(&self, message: &Value) -> Result<(), TransportError> {
        let endpoint = self.endpoint().ok_or(TransportError::NotStarted)?;

        let mut headers = self.default_headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let request = self.http.post(endpoint).headers(headers).json(message);

        // A live scope (open stream or in-flight request) covers the send,
        // so close() aborts an in-flight POST as well.
        let response = match self.scope.active_token() {
            Some(token) => tokio::select! {
                () = token.cancelled() => return Err(TransportError::Aborted),
                result = request.send() => {
                    result.map_err(|err| TransportError::from_reqwest(err, &token))?
                }
            },
            None => request.send().await.map_err(TransportError::Transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(http_status_error(response).await);
        }
        Ok(())
    }

    /// Issues a one-shot request with its own cancellation scope.
    ///
    /// The scope replaces whatever the instance was tracking; an idle timer
    /// aborts it after the effective timeout. Timer and scope are released
    /// on every exit path.
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError> {
        let result = self.request_inner(url, options).await;
        if let Err(err) = &result {
            self.notify_error(err);
        }
        result
    }

    async fn request_inner(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError> {
        let scope = ActiveScope::begin(Arc::clone(&self.scope));
        let token = scope.token();
        let timeout = options.timeout.unwrap_or(self.idle_timeout);
        let mut timer = IdleTimer::new(token.clone(), timeout);
        timer.arm();

        let method = options.method.unwrap_or(Method::GET);
        let mut request = self
            .http
            .request(method, url)
            .headers(merge_headers(&self.default_headers, &options.headers));
        if let Some(body) = options.body.as_ref() {
            request = request.json(body);
        }

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

        tokio::select! {
            () = token.cancelled() => Err(TransportError::Aborted),
            decoded = decode_body(response, options.response_format) => decoded,
        }
    }

    /// Opens the server-push event stream at `url`.
    ///
    /// Returns a lazy, finite, non-restartable sequence of decoded events.
    /// The initial response is validated before any event is produced.
    pub async fn open_stream(
        &self,
        url: &str,
        options: StreamOptions,
    ) -> Result<EventStream, TransportError> {
        let timeout = options.timeout.unwrap_or(self.idle_timeout);
        let mut headers = merge_headers(&self.default_headers, &options.headers);
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let result = EventStream::open(StreamSetup {
            http: self.http.clone(),
            url: url.to_string(),
            headers,
            timeout,
            slot: Arc::clone(&self.scope),
            on_message: self.hooks.on_message.clone(),
            on_error: self.hooks.on_error.clone(),
        })
        .await;
        if let Err(err) = &result {
            self.notify_error(err);
        }
        result
    }

    fn notify_error(&self, err: &TransportError) {
        if let Some(hook) = self.hooks.on_error.as_ref() {
            hook(err);
        }
    }
}

/// Per-call options for [`PushClient::request`].
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// HTTP method; `GET` when unset.
    pub method: Option<Method>,
    /// Per-call headers; win over configured defaults on conflict.
    pub headers: HeaderMap,
    /// JSON body serialized into the request when present.
    pub body: Option<Value>,
    /// Idle timeout override; the instance default applies when unset.
    pub timeout: Option<Duration>,
    /// How the response body is decoded.
    pub response_format: ResponseFormat,
}

/// Response decoding mode for [`PushClient::request`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseFormat {
    /// Decode the body as a JSON value.
    #[default]
    Json,
    /// Decode the body as UTF-8 text.
    Text,
    /// Return the raw body bytes.
    Binary,
}

impl FromStr for ResponseFormat {
    type Err = std::convert::Infallible;

    /// Unrecognized names fall back to `Json`.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(match name {
            "text" => Self::Text,
            "binary" => Self::Binary,
            _ => Self::Json,
        })
    }
}

/// Decoded response body returned by [`PushClient::request`].
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

/// Errors produced by the push transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Base address could not be parsed as a URL.
    #[error("invalid base address: {0}")]
    Configuration(String),

    /// Send attempted before the endpoint was resolved.
    #[error("transport not started")]
    NotStarted,

    /// Non-2xx response on any path.
    #[error("http status {status}: {body}")]
    HttpStatus {
        status: StatusCode,
        status_text: String,
        body: String,
    },

    /// Streaming response was accepted but carried no readable body.
    #[error("response has no readable body")]
    NoResponseBody,

    /// Idle timeout or explicit cancellation fired.
    #[error("operation aborted")]
    Aborted,

    /// Underlying HTTP transport failure.
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
}

impl TransportError {
    /// Maps a transport failure to [`TransportError::Aborted`] when the
    /// scope token was already cancelled.
    pub(crate) fn from_reqwest(err: reqwest::Error, token: &CancellationToken) -> Self {
        if token.is_cancelled() {
            Self::Aborted
        } else {
            Self::Transport(err)
        }
    }
}

fn resolve_endpoint(base: &str) -> Result<Url, TransportError> {
    let base = base.trim_end_matches('/');
    Url::parse(&format!("{base}/{MESSAGES_PATH}"))
        .map_err(|err| TransportError::Configuration(err.to_string()))
}

fn merge_headers(defaults: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for (name, value) in overrides {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

async fn decode_body(
    response: Response,
    format: ResponseFormat,
) -> Result<ResponseBody, TransportError> {
    match format {
        ResponseFormat::Json => response
            .json()
            .await
            .map(ResponseBody::Json)
            .map_err(TransportError::Transport),
        ResponseFormat::Text => response
            .text()
            .await
            .map(ResponseBody::Text)
            .map_err(TransportError::Transport),
        ResponseFormat::Binary => response
            .bytes()
            .await
            .map(ResponseBody::Binary)
            .map_err(TransportError::Transport),
    }
}

pub(crate) async fn http_status_error(response: Response) -> TransportError {
    let status = response.status();
    let status_text = status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string();
    let body = response.text().await.unwrap_or_default();
    TransportError::HttpStatus {
        status,
        status_text,
        body: summarize_error_body(&body),
    }
}

fn summarize_error_body(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message", "reason"] {
            if let Some(message) = parsed.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
