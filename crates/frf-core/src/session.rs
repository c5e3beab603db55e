use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use tokio::sync::Mutex;

use crate::{
    backend::{
        port::BackendPort,
        types::{CloseError, OpenError, SessionCredentials, SessionHandle, SessionIdentity},
    },
    config::Config,
    errors::Error,
    Result,
};

/// Lifecycle of the one logical backend session.
///
/// `Ready` is the only state the dispatcher may send from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Unstarted = 0,
    Starting = 1,
    Ready = 2,
    Stopping = 3,
    Failed = 4,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Stopping => "stopping",
            SessionState::Failed => "failed",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Starting,
            2 => SessionState::Ready,
            3 => SessionState::Stopping,
            4 => SessionState::Failed,
            _ => SessionState::Unstarted,
        }
    }
}

#[derive(Debug)]
struct GuardState {
    state: SessionState,
    handle: Option<SessionHandle>,
}

/// Owner of the zero-or-one live backend session.
///
/// Every open/close transition funnels through the single mutex, so
/// concurrent callers serialize: a caller arriving while an open is in
/// flight waits for that attempt's result instead of starting a second one.
/// The guard never retries an open internally; retry policy belongs to the
/// dispatcher.
pub struct SessionGuard {
    cfg: Arc<Config>,
    backend: Arc<dyn BackendPort>,
    inner: Mutex<GuardState>,
    // Mirror of `inner.state`, written only inside the critical section, so
    // `status()` never queues behind an in-progress open or restart.
    state_cell: AtomicU8,
}

impl SessionGuard {
    pub fn new(cfg: Arc<Config>, backend: Arc<dyn BackendPort>) -> Self {
        Self {
            cfg,
            backend,
            inner: Mutex::new(GuardState {
                state: SessionState::Unstarted,
                handle: None,
            }),
            state_cell: AtomicU8::new(SessionState::Unstarted as u8),
        }
    }

    /// Idempotent: returns the live handle when `Ready` (the lock is held
    /// only long enough to clone it), otherwise performs one open attempt.
    pub async fn ensure_started(&self) -> Result<SessionHandle> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Ready {
            if let Some(handle) = &inner.handle {
                return Ok(handle.clone());
            }
        }
        self.open_locked(&mut inner).await
    }

    /// Close the current handle (tolerating "already closed") and open a new
    /// one. The only path that replaces a handle.
    pub async fn restart(&self) -> Result<SessionHandle> {
        let mut inner = self.inner.lock().await;

        if let Some(handle) = inner.handle.clone() {
            self.transition(&mut inner, SessionState::Stopping);
            match self.backend.close(&handle).await {
                Ok(()) | Err(CloseError::AlreadyClosed) => {}
                Err(CloseError::Backend(msg)) => {
                    // The handle is being replaced either way.
                    tracing::warn!("close failed during restart: {msg}");
                }
            }
        }

        self.transition(&mut inner, SessionState::Unstarted);
        self.open_locked(&mut inner).await
    }

    /// Current state without touching the session lock.
    pub fn status(&self) -> SessionState {
        SessionState::from_u8(self.state_cell.load(Ordering::SeqCst))
    }

    /// Identity captured at open time, if a handle is held.
    pub async fn identity(&self) -> Option<SessionIdentity> {
        self.inner
            .lock()
            .await
            .handle
            .as_ref()
            .map(|h| h.identity.clone())
    }

    /// Snapshot of the held handle (identity + open timestamp) for
    /// diagnostics. Read-only.
    pub async fn handle_info(&self) -> Option<SessionHandle> {
        self.inner.lock().await.handle.clone()
    }

    async fn open_locked(&self, inner: &mut GuardState) -> Result<SessionHandle> {
        self.transition(inner, SessionState::Starting);
        tracing::info!("starting backend session");

        let creds = SessionCredentials {
            api_id: &self.cfg.api_id,
            api_hash: &self.cfg.api_hash,
            session_string: &self.cfg.session_string,
        };

        match self.backend.open(creds).await {
            Ok(handle) => {
                tracing::info!(
                    username = handle.identity.username.as_deref().unwrap_or("?"),
                    "session started"
                );
                inner.handle = Some(handle.clone());
                self.transition(inner, SessionState::Ready);
                Ok(handle)
            }
            Err(OpenError::AlreadyActive) => match inner.handle.clone() {
                // The backend still considers our session live (a prior close
                // did not take server-side). Adopt the handle we hold.
                Some(handle) => {
                    tracing::warn!("backend session already started, keeping existing handle");
                    self.transition(inner, SessionState::Ready);
                    Ok(handle)
                }
                None => {
                    self.transition(inner, SessionState::Failed);
                    Err(Error::Session(
                        "backend reports an active session but no handle is held".to_string(),
                    ))
                }
            },
            Err(err) => {
                self.transition(inner, SessionState::Failed);
                tracing::error!("failed to start session: {err}");
                Err(Error::Session(err.to_string()))
            }
        }
    }

    fn transition(&self, inner: &mut GuardState, next: SessionState) {
        inner.state = next;
        self.state_cell.store(next as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{ChatTarget, SendOutcome};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Scripted backend: each `open`/`close` pops the next scripted result.
    /// An empty open script means "succeed with a fresh generation".
    #[derive(Default)]
    struct FakeBackend {
        opens: AtomicUsize,
        closes: AtomicUsize,
        generation: AtomicUsize,
        open_script: StdMutex<VecDeque<std::result::Result<(), OpenError>>>,
        close_script: StdMutex<VecDeque<std::result::Result<(), CloseError>>>,
        open_delay: Option<Duration>,
    }

    impl FakeBackend {
        fn with_open_script(script: Vec<std::result::Result<(), OpenError>>) -> Self {
            Self {
                open_script: StdMutex::new(script.into()),
                ..Self::default()
            }
        }

        fn open_calls(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn close_calls(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        fn fresh_handle(&self) -> SessionHandle {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            SessionHandle {
                generation,
                identity: SessionIdentity {
                    user_id: 7,
                    username: Some("forwarder".to_string()),
                    display_name: "Forwarder".to_string(),
                },
                opened_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl BackendPort for FakeBackend {
        async fn open(
            &self,
            _creds: SessionCredentials<'_>,
        ) -> std::result::Result<SessionHandle, OpenError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.open_script.lock().unwrap().pop_front();
            match scripted {
                None | Some(Ok(())) => Ok(self.fresh_handle()),
                Some(Err(e)) => Err(e),
            }
        }

        async fn close(&self, _handle: &SessionHandle) -> std::result::Result<(), CloseError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.close_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn is_ready(&self, _handle: &SessionHandle) -> bool {
            true
        }

        async fn send(
            &self,
            _handle: &SessionHandle,
            _chat: &ChatTarget,
            _text: &str,
        ) -> SendOutcome {
            SendOutcome::Ack
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            api_id: "12345".to_string(),
            api_hash: "hash".to_string(),
            target_chat_id: "@drive".to_string(),
            session_string: "session".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            max_send_attempts: 3,
            backoff_min: Duration::from_secs(3),
            backoff_max: Duration::from_secs(6),
            backoff_multiplier: 2,
            flood_wait_ceiling: Duration::from_secs(60),
        })
    }

    fn guard_over(backend: Arc<FakeBackend>) -> SessionGuard {
        SessionGuard::new(test_config(), backend)
    }

    #[tokio::test]
    async fn concurrent_ensure_started_opens_once() {
        let backend = Arc::new(FakeBackend {
            open_delay: Some(Duration::from_millis(10)),
            ..FakeBackend::default()
        });
        let guard = Arc::new(guard_over(backend.clone()));

        let (a, b, c) = tokio::join!(
            guard.ensure_started(),
            guard.ensure_started(),
            guard.ensure_started()
        );

        assert_eq!(backend.open_calls(), 1);
        let ga = a.unwrap().generation;
        assert_eq!(ga, b.unwrap().generation);
        assert_eq!(ga, c.unwrap().generation);
        assert_eq!(guard.status(), SessionState::Ready);
    }

    #[tokio::test]
    async fn ensure_started_is_idempotent_when_ready() {
        let backend = Arc::new(FakeBackend::default());
        let guard = guard_over(backend.clone());

        let first = guard.ensure_started().await.unwrap();
        let second = guard.ensure_started().await.unwrap();

        assert_eq!(first.generation, second.generation);
        assert_eq!(backend.open_calls(), 1);
    }

    #[tokio::test]
    async fn open_failure_marks_failed_without_internal_retry() {
        let backend = Arc::new(FakeBackend::with_open_script(vec![Err(OpenError::Denied(
            "bad credentials".to_string(),
        ))]));
        let guard = guard_over(backend.clone());

        let err = guard.ensure_started().await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(guard.status(), SessionState::Failed);
        assert_eq!(backend.open_calls(), 1);
    }

    #[tokio::test]
    async fn restart_closes_then_opens_fresh_handle() {
        let backend = Arc::new(FakeBackend::default());
        let guard = guard_over(backend.clone());

        let first = guard.ensure_started().await.unwrap();
        let second = guard.restart().await.unwrap();

        assert_ne!(first.generation, second.generation);
        assert_eq!(backend.close_calls(), 1);
        assert_eq!(backend.open_calls(), 2);
        assert_eq!(guard.status(), SessionState::Ready);
    }

    #[tokio::test]
    async fn restart_tolerates_already_closed() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .close_script
            .lock()
            .unwrap()
            .push_back(Err(CloseError::AlreadyClosed));
        let guard = guard_over(backend.clone());

        guard.ensure_started().await.unwrap();
        assert!(guard.restart().await.is_ok());
        assert_eq!(guard.status(), SessionState::Ready);
    }

    #[tokio::test]
    async fn already_active_on_reopen_adopts_held_handle() {
        let backend = Arc::new(FakeBackend::with_open_script(vec![
            Ok(()),
            Err(OpenError::AlreadyActive),
        ]));
        let guard = guard_over(backend.clone());

        let first = guard.ensure_started().await.unwrap();
        let adopted = guard.restart().await.unwrap();

        assert_eq!(first.generation, adopted.generation);
        assert_eq!(guard.status(), SessionState::Ready);
    }

    #[tokio::test]
    async fn already_active_without_handle_is_a_failure() {
        let backend = Arc::new(FakeBackend::with_open_script(vec![Err(
            OpenError::AlreadyActive,
        )]));
        let guard = guard_over(backend.clone());

        assert!(guard.ensure_started().await.is_err());
        assert_eq!(guard.status(), SessionState::Failed);
    }

    #[tokio::test]
    async fn identity_reads_do_not_mutate_state() {
        let backend = Arc::new(FakeBackend::default());
        let guard = guard_over(backend.clone());

        assert!(guard.identity().await.is_none());
        guard.ensure_started().await.unwrap();

        let identity = guard.identity().await.unwrap();
        assert_eq!(identity.username.as_deref(), Some("forwarder"));
        assert_eq!(backend.open_calls(), 1);
        assert_eq!(guard.status(), SessionState::Ready);
    }
}
