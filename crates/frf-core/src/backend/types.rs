use std::time::Duration;

use chrono::{DateTime, Utc};

/// Target chat for outbound commands: a numeric id or an `@username`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatTarget(pub String);

/// Borrowed view of the credentials the backend needs to open a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionCredentials<'a> {
    pub api_id: &'a str,
    pub api_hash: &'a str,
    pub session_string: &'a str,
}

/// Who the session is authenticated as, captured once at open time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: u64,
    pub username: Option<String>,
    pub display_name: String,
}

/// Revocable capability for a live authenticated session.
///
/// Plain data: the adapter owns the actual connection and honors at most one
/// generation at a time. A handle whose generation has been superseded is
/// refused with [`SendOutcome::SessionInvalid`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub generation: u64,
    pub identity: SessionIdentity,
    pub opened_at: DateTime<Utc>,
}

/// Result of one backend send call.
///
/// A closed set: the dispatcher switches on these explicitly, so a new
/// failure class cannot sneak past the retry logic as an untyped error.
#[derive(Clone, Debug)]
pub enum SendOutcome {
    /// Delivered and acknowledged.
    Ack,
    /// Backend asks the caller to wait before retrying.
    RateLimited(Duration),
    /// The current handle is no longer usable and must be replaced.
    SessionInvalid,
    /// Non-retryable backend refusal, surfaced verbatim.
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The backend reports a session already active for these credentials.
    #[error("session already active")]
    AlreadyActive,

    #[error("backend denied session open: {0}")]
    Denied(String),

    #[error("transport failure while opening session: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    /// The handle was not open any more; treated as success by callers.
    #[error("session already closed")]
    AlreadyClosed,

    #[error("backend failed to close session: {0}")]
    Backend(String),
}
