//! Telegram adapter (teloxide).
//!
//! Implements the `frf-core` BackendPort over the Telegram Bot API. The
//! session string doubles as the bot token; `api_id`/`api_hash` are carried
//! for deployments that front a self-hosted Bot API gateway, which is where
//! they are consumed.

use async_trait::async_trait;

use chrono::Utc;
use teloxide::{prelude::*, types::Recipient, RequestError};
use tokio::sync::Mutex;

use frf_core::backend::{
    port::BackendPort,
    types::{
        ChatTarget, CloseError, OpenError, SendOutcome, SessionCredentials, SessionHandle,
        SessionIdentity,
    },
};

#[derive(Default)]
struct Slot {
    bot: Option<Bot>,
    generation: u64,
}

/// Backend session provider over a single Telegram client.
///
/// At most one generation of client is live; handles carry the generation
/// they were opened under, so a handle that survived a restart is refused
/// as `SessionInvalid` rather than silently sending through the new client.
#[derive(Default)]
pub struct TelegramBackend {
    slot: Mutex<Slot>,
}

impl TelegramBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_bot(&self, handle: &SessionHandle) -> Option<Bot> {
        let slot = self.slot.lock().await;
        match &slot.bot {
            Some(bot) if slot.generation == handle.generation => Some(bot.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl BackendPort for TelegramBackend {
    async fn open(
        &self,
        creds: SessionCredentials<'_>,
    ) -> std::result::Result<SessionHandle, OpenError> {
        let mut slot = self.slot.lock().await;
        if slot.bot.is_some() {
            return Err(OpenError::AlreadyActive);
        }

        tracing::debug!(api_id = creds.api_id, "opening telegram session");
        let bot = Bot::new(creds.session_string);

        // Validate the credential and capture who we are in one call.
        let me = bot.get_me().await.map_err(map_open_error)?;
        let identity = SessionIdentity {
            user_id: me.user.id.0,
            username: me.user.username.clone(),
            display_name: me.user.first_name.clone(),
        };

        slot.generation += 1;
        slot.bot = Some(bot);

        Ok(SessionHandle {
            generation: slot.generation,
            identity,
            opened_at: Utc::now(),
        })
    }

    async fn close(&self, handle: &SessionHandle) -> std::result::Result<(), CloseError> {
        let mut slot = self.slot.lock().await;
        if slot.bot.is_none() || slot.generation != handle.generation {
            return Err(CloseError::AlreadyClosed);
        }
        // Bot API clients are stateless HTTP; dropping the client severs the
        // session on our side.
        slot.bot = None;
        Ok(())
    }

    async fn is_ready(&self, handle: &SessionHandle) -> bool {
        self.live_bot(handle).await.is_some()
    }

    async fn send(&self, handle: &SessionHandle, chat: &ChatTarget, text: &str) -> SendOutcome {
        let Some(bot) = self.live_bot(handle).await else {
            return SendOutcome::SessionInvalid;
        };

        match bot.send_message(recipient(chat), text.to_owned()).await {
            Ok(_) => SendOutcome::Ack,
            Err(RequestError::RetryAfter(wait)) => SendOutcome::RateLimited(wait),
            Err(err) => classify_failure(&err),
        }
    }
}

fn recipient(chat: &ChatTarget) -> Recipient {
    match chat.0.parse::<i64>() {
        Ok(id) => Recipient::Id(teloxide::types::ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat.0.clone()),
    }
}

fn map_open_error(err: RequestError) -> OpenError {
    match err {
        RequestError::Api(api) => OpenError::Denied(api.to_string()),
        other => OpenError::Transport(other.to_string()),
    }
}

/// Everything except `RetryAfter`, which the caller handles first.
fn classify_failure(err: &RequestError) -> SendOutcome {
    match err {
        RequestError::Api(api) => {
            let text = api.to_string();
            if is_auth_failure(&text) {
                SendOutcome::SessionInvalid
            } else {
                SendOutcome::Rejected(text)
            }
        }
        other => SendOutcome::Rejected(other.to_string()),
    }
}

fn is_auth_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("unauthorized") || lower.contains("terminated") || lower.contains("revoked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::ApiError;

    #[test]
    fn numeric_and_username_chat_targets() {
        assert!(matches!(
            recipient(&ChatTarget("-1001234".to_string())),
            Recipient::Id(teloxide::types::ChatId(-1001234))
        ));
        assert!(matches!(
            recipient(&ChatTarget("@drive".to_string())),
            Recipient::ChannelUsername(name) if name == "@drive"
        ));
    }

    #[test]
    fn unauthorized_api_error_invalidates_the_session() {
        let err = RequestError::Api(ApiError::Unknown("Unauthorized".to_string()));
        assert!(matches!(
            classify_failure(&err),
            SendOutcome::SessionInvalid
        ));
    }

    #[test]
    fn other_api_errors_are_rejections() {
        let err = RequestError::Api(ApiError::Unknown("Bad Request: chat not found".to_string()));
        assert!(matches!(
            classify_failure(&err),
            SendOutcome::Rejected(msg) if msg.contains("chat not found")
        ));
    }
}
