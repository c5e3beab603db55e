use std::{sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    backend::{
        port::BackendPort,
        types::{ChatTarget, SendOutcome},
    },
    session::SessionGuard,
};

/// Bounds for the dispatch retry loop.
///
/// Backoff after a rate limit is `multiplier * 2^(attempt-1)` seconds, raised
/// to the backend's wait hint when that is larger, clamped to
/// `[min_backoff, max_backoff]`. A hint above `flood_wait_ceiling` is treated
/// as unserviceable: the dispatch fails fast instead of sleeping through a
/// wait no caller would sit out.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total send attempts per dispatch, including the first.
    pub max_attempts: u32,
    pub backoff_multiplier: u64,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub flood_wait_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2,
            min_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(6),
            flood_wait_ceiling: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), given the
    /// backend's wait hint.
    fn backoff(&self, attempt: u32, hint: Duration) -> Duration {
        let exp = self
            .backoff_multiplier
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(32));
        let wait = Duration::from_secs(exp).max(hint);
        wait.clamp(self.min_backoff, self.max_backoff)
    }
}

/// Terminal failure classes of one dispatch call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session could not be established or re-established.
    SessionUnavailable,
    /// The backend demanded a wait beyond the serviceable ceiling.
    RateLimitExceeded,
    /// The attempt budget ran out without a conclusive result.
    RetriesExhausted,
    /// Non-retryable backend refusal.
    BackendRejected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SessionUnavailable => "session_unavailable",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::BackendRejected => "backend_rejected",
        }
    }
}

/// Result of one dispatch call; produced per call, never persisted.
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    pub success: bool,
    pub status_code: u16,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    /// Backend send calls actually made.
    pub attempts: u32,
}

impl DispatchOutcome {
    fn delivered(attempts: u32) -> Self {
        Self {
            success: true,
            status_code: 200,
            error_kind: None,
            message: None,
            attempts,
        }
    }

    fn failed(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            status_code: 500,
            error_kind: Some(kind),
            message: Some(message.into()),
            attempts,
        }
    }
}

/// Sends commands through the guarded session, absorbing rate limits and
/// session invalidation up to the attempt budget.
///
/// All retry policy lives here; the guard performs single attempts only.
/// Sends are deliberately not serialized through the guard's critical
/// section: the handle is plain data over an adapter client that is safe for
/// concurrent use, so independent dispatches overlap freely while open/close
/// stay totally ordered.
pub struct Dispatcher {
    guard: Arc<SessionGuard>,
    backend: Arc<dyn BackendPort>,
    chat: ChatTarget,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        guard: Arc<SessionGuard>,
        backend: Arc<dyn BackendPort>,
        chat: ChatTarget,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            guard,
            backend,
            chat,
            policy,
        }
    }

    /// Deliver `command` to the target chat.
    ///
    /// An explicit bounded loop: `attempts` counts backend send calls and
    /// never exceeds `policy.max_attempts`, so every suspend point (backoff
    /// sleep, guarded restart) is bounded.
    pub async fn send(&self, command: &str) -> DispatchOutcome {
        let mut handle = match self.guard.ensure_started().await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!("session unavailable for dispatch: {err}");
                return DispatchOutcome::failed(ErrorKind::SessionUnavailable, err.to_string(), 0);
            }
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.backend.send(&handle, &self.chat, command).await {
                SendOutcome::Ack => return DispatchOutcome::delivered(attempts),

                SendOutcome::RateLimited(hint) => {
                    if hint > self.policy.flood_wait_ceiling {
                        let msg = format!(
                            "backend demands a {}s wait, above the {}s ceiling",
                            hint.as_secs(),
                            self.policy.flood_wait_ceiling.as_secs()
                        );
                        tracing::error!("{msg}");
                        return DispatchOutcome::failed(
                            ErrorKind::RateLimitExceeded,
                            msg,
                            attempts,
                        );
                    }
                    if attempts >= self.policy.max_attempts {
                        return self.exhausted(attempts);
                    }
                    let wait = self.policy.backoff(attempts, hint);
                    tracing::warn!(
                        "rate limited on attempt {attempts}, retrying in {}s",
                        wait.as_secs()
                    );
                    sleep(wait).await;
                }

                SendOutcome::SessionInvalid => {
                    if attempts >= self.policy.max_attempts {
                        return self.exhausted(attempts);
                    }
                    tracing::warn!("session invalidated mid-dispatch, restarting");
                    handle = match self.guard.restart().await {
                        Ok(handle) => handle,
                        Err(err) => {
                            tracing::error!("restart failed: {err}");
                            return DispatchOutcome::failed(
                                ErrorKind::SessionUnavailable,
                                err.to_string(),
                                attempts,
                            );
                        }
                    };
                }

                SendOutcome::Rejected(msg) => {
                    tracing::error!("backend rejected command: {msg}");
                    return DispatchOutcome::failed(ErrorKind::BackendRejected, msg, attempts);
                }
            }
        }
    }

    fn exhausted(&self, attempts: u32) -> DispatchOutcome {
        let msg = format!("unable to send command after {attempts} attempts");
        tracing::error!("{msg}");
        DispatchOutcome::failed(ErrorKind::RetriesExhausted, msg, attempts)
    }
}
