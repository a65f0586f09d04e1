//! Session cache kept in step with native and push events.
//!
//! A session moves through `absent -> Pending -> Active -> absent`:
//!
//! - `playerConnecting` inserts a `Pending` entry right away, then asks the
//!   engine for a token. The entry becomes `Active` and `sessionStarted` is
//!   emitted only if nothing removed it in the meantime.
//! - `socketSessionUpdated` refetches a cached session and merges it. A session
//!   the engine no longer knows is treated as finished with
//!   [`EndReason::Unknown`].
//! - `socketSessionFinished` and `playerDropped` remove the entry before
//!   `sessionFinished` is emitted, and only emit when something was removed.

use crate::api::{SessionApi, SessionRecord};
use crate::error::DomainError;
use async_trait::async_trait;
use dashmap::DashMap;
use event_system::{
    completed, current_timestamp, EndReason, EventError, EventName, FutureExt, HandlerFuture, Hook,
    HookOutcome, PlayerConnecting, PlayerDropped, SessionFinished, SessionStarted, SessionUpdated,
    SocketSessionFinished, SocketSessionUpdated,
};
use server_context::{
    bind_method, EngineError, EventBinding, EventMethod, Service, ServiceBase, ServiceError,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs before a connecting player is given a session token.
///
/// Handlers may rewrite the IP address or veto the session. A chain that
/// changes `session_id` is treated as a failure and the session is dropped.
pub struct SessionStartHook;

impl Hook for SessionStartHook {
    const NAME: &'static str = "sessionStart";
    type Input = PlayerConnecting;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for the engine to hand out a token.
    Pending,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSession {
    pub session_id: String,
    pub state: SessionState,
    pub session_token: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub updated_at: u64,
}

impl CachedSession {
    fn pending(session_id: &str, ip_address: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: SessionState::Pending,
            session_token: None,
            user_id: None,
            ip_address: Some(ip_address.to_string()),
            updated_at: current_timestamp(),
        }
    }

    fn from_record(record: SessionRecord) -> Self {
        Self {
            session_id: record.id,
            state: SessionState::Active,
            session_token: None,
            user_id: record.user_id,
            ip_address: record.ip_address,
            updated_at: current_timestamp(),
        }
    }

    fn merge(&mut self, record: &SessionRecord) {
        self.user_id = record.user_id.clone();
        if record.ip_address.is_some() {
            self.ip_address = record.ip_address.clone();
        }
        self.updated_at = current_timestamp();
    }
}

pub struct SessionService {
    base: ServiceBase,
    sessions: DashMap<String, CachedSession>,
}

impl SessionService {
    pub fn find_session(&self, session_id: &str) -> Option<CachedSession> {
        self.sessions.get(session_id).map(|session| session.clone())
    }

    /// Returns the cached session, whatever its state.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] if the session is not cached.
    pub fn get_session(&self, session_id: &str) -> Result<CachedSession, DomainError> {
        self.find_session(session_id)
            .ok_or_else(|| DomainError::NotFound(format!("session {}", session_id)))
    }

    /// Every cached session, ordered by id.
    pub fn sessions(&self) -> Vec<CachedSession> {
        let mut sessions: Vec<CachedSession> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ends an active session on the engine and locally.
    ///
    /// The cache entry is removed and `sessionFinished` emitted once the engine
    /// accepted the request, or reported the session as already gone.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session to end
    /// * `reason` - Reported to the engine and carried by `sessionFinished`
    ///
    /// # Errors
    ///
    /// * [`DomainError::NotFound`] if the session is not cached
    /// * [`DomainError::Conflict`] if it is still waiting for its token
    /// * Any other engine failure, leaving the entry in place
    ///
    /// # Example
    ///
    /// ```ignore
    /// let sessions = context.get_service::<SessionService>()?;
    /// sessions.end_session("s1", EndReason::Kicked).await?;
    /// ```
    pub async fn end_session(&self, session_id: &str, reason: EndReason) -> Result<(), DomainError> {
        match self.sessions.get(session_id).map(|session| session.state) {
            None => return Err(DomainError::NotFound(format!("session {}", session_id))),
            Some(SessionState::Pending) => {
                return Err(DomainError::Conflict(format!(
                    "session {} is still starting",
                    session_id
                )))
            }
            Some(SessionState::Active) => {}
        }

        let api = self
            .base
            .get_api::<SessionApi>()
            .map_err(|e| DomainError::Engine(EngineError::Unavailable(e.to_string())))?;
        match api.finish_session(session_id, reason).await {
            Ok(()) => {}
            // Already gone remotely; still drop it here.
            Err(e) if e.is_not_found() => debug!("Session {} already finished on the engine", session_id),
            Err(e) => return Err(e.into()),
        }

        self.finish(session_id, reason);
        Ok(())
    }

    /// Removes a session and announces it, if it was cached.
    fn finish(&self, session_id: &str, reason: EndReason) -> bool {
        if self.sessions.remove(session_id).is_none() {
            debug!("Session {} was not cached, nothing to finish", session_id);
            return false;
        }

        info!("👋 Session {} finished ({})", session_id, reason);
        self.base.events().emit(SessionFinished {
            session_id: session_id.to_string(),
            end_reason: reason,
        });
        true
    }

    fn on_player_connecting(self: &Arc<Self>, event: &PlayerConnecting) -> HandlerFuture {
        self.sessions.insert(
            event.session_id.clone(),
            CachedSession::pending(&event.session_id, &event.ip_address),
        );

        let service = Arc::clone(self);
        let connecting = event.clone();
        async move { service.start(connecting).await }.boxed()
    }

    async fn start(&self, connecting: PlayerConnecting) -> Result<(), EventError> {
        let session_id = connecting.session_id.clone();

        let outcome = match self.base.hooks().invoke::<SessionStartHook>(connecting).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_pending(&session_id);
                return Err(EventError::handler(e));
            }
        };
        let connecting = match outcome {
            HookOutcome::Vetoed { reason, by } => {
                info!("🚫 Session {} refused by {}: {}", session_id, by, reason);
                self.discard_pending(&session_id);
                return Ok(());
            }
            HookOutcome::Completed(value) | HookOutcome::Stopped { value, .. } => value,
        };

        if connecting.session_id != session_id {
            warn!(
                "⚠️ {} hook renamed session {} to {}, dropping it",
                SessionStartHook::NAME,
                session_id,
                connecting.session_id
            );
            self.discard_pending(&session_id);
            return Err(EventError::HandlerExecution(format!(
                "{} hook may not change session id {} to {}",
                SessionStartHook::NAME,
                session_id,
                connecting.session_id
            )));
        }

        let api = match self.base.get_api::<SessionApi>() {
            Ok(api) => api,
            Err(e) => {
                self.discard_pending(&session_id);
                return Err(EventError::handler(e));
            }
        };
        let token = match api
            .create_session(&connecting.session_id, &connecting.ip_address)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!("⚠️ Could not obtain a token for session {}: {}", session_id, e);
                self.discard_pending(&session_id);
                return Err(EventError::handler(e));
            }
        };

        let activated = match self.sessions.get_mut(&session_id) {
            Some(mut session) if session.state == SessionState::Pending => {
                session.state = SessionState::Active;
                session.session_token = Some(token.session_token.clone());
                session.ip_address = Some(connecting.ip_address.clone());
                session.updated_at = current_timestamp();
                true
            }
            _ => false,
        };

        if !activated {
            debug!("Session {} ended before its token arrived", session_id);
            return Ok(());
        }

        info!("🎮 Session {} started", session_id);
        self.base.events().emit(SessionStarted {
            session_id,
            session_token: token.session_token,
        });
        Ok(())
    }

    fn discard_pending(&self, session_id: &str) {
        self.sessions
            .remove_if(session_id, |_, session| session.state == SessionState::Pending);
    }

    fn on_session_updated(self: &Arc<Self>, event: &SocketSessionUpdated) -> HandlerFuture {
        if !self.sessions.contains_key(&event.id) {
            debug!("Ignoring update for unknown session {}", event.id);
            return completed();
        }

        let service = Arc::clone(self);
        let session_id = event.id.clone();
        async move { service.refresh(session_id).await }.boxed()
    }

    async fn refresh(&self, session_id: String) -> Result<(), EventError> {
        let api = self.base.get_api::<SessionApi>().map_err(EventError::handler)?;

        let record = match api.get_session(&session_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!("Session {} vanished from the engine", session_id);
                self.finish(&session_id, EndReason::Unknown);
                return Ok(());
            }
            Err(e) => {
                warn!("⚠️ Failed to refresh session {}: {}", session_id, e);
                return Err(EventError::handler(e));
            }
        };

        let merged = match self.sessions.get_mut(&session_id) {
            Some(mut session) => {
                session.merge(&record);
                true
            }
            None => false,
        };

        if !merged {
            debug!("Session {} finished while refreshing", session_id);
            return Ok(());
        }

        if let Some(user_id) = record.user_id {
            self.base.events().emit(SessionUpdated { session_id, user_id });
        }
        Ok(())
    }

    fn on_session_finished(self: &Arc<Self>, event: &SocketSessionFinished) -> HandlerFuture {
        self.finish(&event.id, event.end_reason);
        completed()
    }

    fn on_player_dropped(self: &Arc<Self>, event: &PlayerDropped) -> HandlerFuture {
        if !self.finish(&event.session_id, event.reason) {
            return completed();
        }

        let service = Arc::clone(self);
        let dropped = event.clone();
        async move { service.notify_dropped(dropped).await }.boxed()
    }

    /// The engine only learns about native drops from us.
    async fn notify_dropped(&self, dropped: PlayerDropped) -> Result<(), EventError> {
        let api = self.base.get_api::<SessionApi>().map_err(EventError::handler)?;
        match api.finish_session(&dropped.session_id, dropped.reason).await {
            Err(e) if !e.is_not_found() => {
                warn!("⚠️ Engine was not told about dropped session {}: {}", dropped.session_id, e);
                Err(EventError::handler(e))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Service for SessionService {
    const EVENT_BINDINGS: &'static [EventBinding] = &[
        EventBinding::new(EventName::PlayerConnecting, "on_player_connecting"),
        EventBinding::new(EventName::PlayerDropped, "on_player_dropped"),
        EventBinding::new(EventName::SocketSessionUpdated, "on_session_updated"),
        EventBinding::new(EventName::SocketSessionFinished, "on_session_finished"),
    ];

    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self {
            base,
            sessions: DashMap::new(),
        })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn event_method(self: &Arc<Self>, method: &str) -> Option<EventMethod> {
        match method {
            "on_player_connecting" => Some(bind_method(self, method, Self::on_player_connecting)),
            "on_player_dropped" => Some(bind_method(self, method, Self::on_player_dropped)),
            "on_session_updated" => Some(bind_method(self, method, Self::on_session_updated)),
            "on_session_finished" => Some(bind_method(self, method, Self::on_session_finished)),
            _ => None,
        }
    }

    async fn init(&self) -> Result<(), ServiceError> {
        let api = self.base.get_api::<SessionApi>()?;
        let records = api.list_sessions().await?;

        for record in records {
            self.sessions
                .insert(record.id.clone(), CachedSession::from_record(record));
        }

        self.base
            .logger()
            .info(&format!("Loaded {} active sessions", self.sessions.len()));
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        let cached = self.sessions.len();
        self.sessions.clear();
        self.base
            .logger()
            .debug(&format!("Dropped {} cached sessions", cached));
        Ok(())
    }
}
