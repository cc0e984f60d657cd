//! User-facing Rust SDK for the Pushline push-message transport.
//!
//! The crate is organized by transport surface:
//! - `client`: HTTP client owning the endpoint lifecycle, unary sends, and
//!   generic one-shot requests.
//! - `stream`: server-push event stream receiver and wire-format framing.
//! - `cancel`: cancellation-scope and idle-timeout helpers shared by the
//!   unary and streaming paths.

/// Cancellation and idle-timeout helpers used across the SDK.
pub mod cancel;
/// HTTP client, configuration options, and the transport error taxonomy.
pub mod client;
/// Server-push event stream receiver and wire-format framing.
pub mod stream;
