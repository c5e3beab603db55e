use async_trait::async_trait;

use crate::backend::types::{
    ChatTarget, CloseError, OpenError, SendOutcome, SessionCredentials, SessionHandle,
};

/// Hexagonal port for the backend session provider.
///
/// Telegram is the first implementation. The session guard is the only caller
/// of `open`/`close`; the dispatcher only calls `send`. `send` is infallible
/// at the transport level: every failure is one of the [`SendOutcome`]
/// variants so retry classification happens in exactly one place.
#[async_trait]
pub trait BackendPort: Send + Sync {
    async fn open(
        &self,
        creds: SessionCredentials<'_>,
    ) -> std::result::Result<SessionHandle, OpenError>;

    async fn close(&self, handle: &SessionHandle) -> std::result::Result<(), CloseError>;

    /// Whether this handle is still the live one.
    async fn is_ready(&self, handle: &SessionHandle) -> bool;

    async fn send(&self, handle: &SessionHandle, chat: &ChatTarget, text: &str) -> SendOutcome;
}
