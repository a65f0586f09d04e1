//! Translates inbound stimuli into bus events.
//!
//! The game engine calls the native hooks directly. The push channel delivers
//! JSON envelopes of the form `{"event": "<wire name>", "data": {...}}`, and
//! only push-origin events are accepted from it.

use crate::error::InboundError;
use event_system::{
    Dispatch, EndReason, EventBus, EventName, EventOrigin, PlayerConnecting, PlayerDropped,
    ServerEvent,
};
use server_context::ServerContext;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct InboundAdapter {
    events: Arc<EventBus>,
}

impl InboundAdapter {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }

    pub fn from_context(context: &ServerContext) -> Self {
        Self::new(context.events())
    }

    pub fn player_connecting(&self, session_id: impl Into<String>, ip_address: impl Into<String>) -> Dispatch {
        self.events.emit(PlayerConnecting {
            session_id: session_id.into(),
            ip_address: ip_address.into(),
        })
    }

    pub fn player_dropped(&self, session_id: impl Into<String>, reason: EndReason) -> Dispatch {
        self.events.emit(PlayerDropped {
            session_id: session_id.into(),
            reason,
        })
    }

    /// Emits an already decoded push event.
    pub fn push(&self, event: ServerEvent) -> Result<Dispatch, InboundError> {
        let name = event.name();
        if name.origin() != EventOrigin::Push {
            return Err(InboundError::NotPushOrigin(name));
        }
        Ok(self.events.emit(event))
    }

    /// Decodes and emits a raw push envelope.
    pub fn push_json(&self, raw: &str) -> Result<Dispatch, InboundError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        let wire_name = value
            .get("event")
            .and_then(|name| name.as_str())
            .unwrap_or_default()
            .to_string();
        if EventName::from_wire(&wire_name).is_none() {
            return Err(InboundError::UnknownEvent(wire_name));
        }

        let event: ServerEvent = serde_json::from_value(value)?;
        debug!("📥 Push event {}", event.name());
        self.push(event)
    }
}
