use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::Config,
    session::{SessionGuard, SessionState},
};

/// Liveness/readiness snapshot served on `/status`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub ready: bool,
    pub status: String,
    pub session_state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_chat: Option<String>,
}

/// Read-only view over configuration presence and session state.
///
/// Never mutates session state and never triggers a restart; a failed
/// session shows up as `ready: false` until a dispatch recovers it.
pub struct StatusReporter {
    cfg: Arc<Config>,
    guard: Arc<SessionGuard>,
}

impl StatusReporter {
    pub fn new(cfg: Arc<Config>, guard: Arc<SessionGuard>) -> Self {
        Self { cfg, guard }
    }

    pub async fn report(&self) -> StatusReport {
        let state = self.guard.status();

        if !self.cfg.is_complete() {
            return StatusReport {
                ready: false,
                status: "missing required config".to_string(),
                session_state: state.as_str(),
                user_name: None,
                user_id: None,
                started_at: None,
                target_chat: None,
            };
        }

        let handle = self.guard.handle_info().await;
        let ready = state == SessionState::Ready && handle.is_some();

        let (user_name, user_id, started_at) = match &handle {
            Some(h) => (
                h.identity.username.clone(),
                Some(h.identity.user_id),
                Some(h.opened_at.to_rfc3339()),
            ),
            None => (None, None, None),
        };

        StatusReport {
            ready,
            status: if ready {
                "ok".to_string()
            } else {
                format!("session {}", state.as_str())
            },
            session_state: state.as_str(),
            user_name,
            user_id,
            started_at,
            target_chat: Some(self.cfg.target_chat_id.clone()),
        }
    }
}
