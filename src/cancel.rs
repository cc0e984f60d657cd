//! Cancellation and idle-timeout utilities.
//!
//! The helpers in this module are transport-agnostic and are shared by the
//! unary request path and the streaming receiver. An instance tracks at most
//! one cancellable operation at a time; see [`ScopeSlot`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Instance-wide slot tracking the currently cancellable operation.
///
/// Only one scope is tracked at a time. Beginning a new scope overwrites the
/// tracked token without cancelling the prior one, so overlapping calls on
/// one instance share the slot with last-writer-wins semantics.
#[derive(Debug, Default)]
pub struct ScopeSlot {
    active: Mutex<Option<CancellationToken>>,
}

impl ScopeSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new scope and tracks it as the active one.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.active.lock() {
            *guard = Some(token.clone());
        }
        token
    }

    /// Returns the currently tracked token, if any.
    pub fn active_token(&self) -> Option<CancellationToken> {
        self.active.lock().ok().and_then(|guard| guard.clone())
    }

    /// Cancels the currently tracked scope. No-op when the slot is empty.
    pub fn cancel_active(&self) {
        if let Some(token) = self.active_token() {
            token.cancel();
        }
    }

    /// Clears the tracked scope without cancelling it.
    pub fn release(&self) {
        if let Ok(mut guard) = self.active.lock() {
            guard.take();
        }
    }
}

/// RAII guard for a scope begun on a [`ScopeSlot`].
///
/// Dropping the guard releases the slot. Release never implies cancellation;
/// a completed operation simply stops being trackable.
pub struct ActiveScope {
    slot: Arc<ScopeSlot>,
    token: CancellationToken,
}

impl ActiveScope {
    /// Begins a scope on `slot` and keeps it tracked until dropped.
    pub fn begin(slot: Arc<ScopeSlot>) -> Self {
        let token = slot.begin();
        Self { slot, token }
    }

    /// Returns a clone of the scope's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        self.slot.release();
    }
}

/// Renewable idle deadline that cancels a scope when it fires.
///
/// At most one countdown is armed at a time. Re-arming aborts the previous
/// countdown and starts a fresh one, so the deadline measures silence since
/// the most recent event rather than total elapsed time.
pub struct IdleTimer {
    token: CancellationToken,
    timeout: Duration,
    armed: Option<JoinHandle<()>>,
}

impl IdleTimer {
    /// Creates a disarmed timer that will cancel `token` on expiry.
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            timeout,
            armed: None,
        }
    }

    /// Arms the timer, replacing any previously armed countdown.
    pub fn arm(&mut self) {
        self.disarm();
        let token = self.token.clone();
        let timeout = self.timeout;
        self.armed = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(
                event = "idle_timeout_fired",
                timeout_ms = timeout.as_millis() as u64
            );
            token.cancel();
        }));
    }

    /// Aborts the armed countdown, if any.
    pub fn disarm(&mut self) {
        if let Some(handle) = self.armed.take() {
            handle.abort();
        }
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
