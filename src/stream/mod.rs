//! Server-push stream modules.
//!
//! - `client`: push connection setup and the lazy decoded-event sequence.
//! - `frame`: wire-format reassembly and payload classification.

/// Push connection and decoded-event sequence.
pub mod client;
/// Wire-format framing and payload classification.
pub mod frame;
