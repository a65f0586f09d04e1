//! Closed enumeration of server events.
//!
//! Every event the framework can carry is declared here exactly once. Each event
//! has a stable wire name (camelCase, as used by the push channel), an
//! [`EventOrigin`], and its own payload struct. The `server_events!` macro
//! generates [`EventName`], the [`ServerEvent`] envelope and the
//! [`EventPayload`] glue for every payload type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an event comes from.
///
/// - **Native**: raised by the game-engine runtime (player connect/drop)
/// - **Push**: raised by the backend's real-time socket channel; these are refresh
///   triggers, not data of record
/// - **Domain**: derived events re-emitted by services for other consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOrigin {
    Native,
    Push,
    Domain,
}

/// Typed payload bound to exactly one [`EventName`].
///
/// Implemented by `server_events!` for every payload struct; do not implement
/// it by hand.
pub trait EventPayload: Clone + Send + Sync + fmt::Debug + 'static {
    /// The event name this payload travels under.
    const NAME: EventName;

    /// Borrows the payload out of an envelope if the envelope carries this type.
    fn from_event(event: &ServerEvent) -> Option<&Self>;

    /// Wraps the payload into its envelope.
    fn into_event(self) -> ServerEvent;
}

/// Declares the event enumeration.
///
/// Groups are keyed by [`EventOrigin`] variant; each entry maps a payload struct
/// (which doubles as the variant name) to its wire name.
macro_rules! server_events {
    ($( $origin:ident { $( $variant:ident => $wire:literal ),* $(,)? } )*) => {
        /// Name of every event known to the server.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EventName {
            $($(
                #[serde(rename = $wire)]
                $variant,
            )*)*
        }

        impl EventName {
            /// All event names, in declaration order.
            pub const ALL: &'static [EventName] = &[$($(EventName::$variant,)*)*];

            /// Wire name of the event.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($(EventName::$variant => $wire,)*)*
                }
            }

            /// Origin class of the event.
            pub fn origin(&self) -> EventOrigin {
                match self {
                    $($(EventName::$variant => EventOrigin::$origin,)*)*
                }
            }

            /// Looks an event up by its wire name.
            pub fn from_wire(name: &str) -> Option<EventName> {
                match name {
                    $($($wire => Some(EventName::$variant),)*)*
                    _ => None,
                }
            }
        }

        /// Envelope carrying any event payload.
        ///
        /// Serializes as `{"event": "<wire name>", "data": { ...payload... }}`.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "event", content = "data")]
        pub enum ServerEvent {
            $($(
                #[serde(rename = $wire)]
                $variant($variant),
            )*)*
        }

        impl ServerEvent {
            /// Name of the carried event.
            pub fn name(&self) -> EventName {
                match self {
                    $($(ServerEvent::$variant(_) => EventName::$variant,)*)*
                }
            }
        }

        $($(
            impl EventPayload for $variant {
                const NAME: EventName = EventName::$variant;

                fn from_event(event: &ServerEvent) -> Option<&Self> {
                    match event {
                        ServerEvent::$variant(payload) => Some(payload),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn into_event(self) -> ServerEvent {
                    ServerEvent::$variant(self)
                }
            }

            impl From<$variant> for ServerEvent {
                fn from(payload: $variant) -> Self {
                    ServerEvent::$variant(payload)
                }
            }
        )*)*
    };
}

server_events! {
    Native {
        PlayerConnecting => "playerConnecting",
        PlayerDropped => "playerDropped",
    }
    Push {
        SocketSessionUpdated => "socketSessionUpdated",
        SocketSessionFinished => "socketSessionFinished",
        SocketReferenceUpdated => "socketReferenceUpdated",
        SocketLocaleAdded => "socketLocaleAdded",
        SocketLocaleUpdated => "socketLocaleUpdated",
        SocketLocaleRemoved => "socketLocaleRemoved",
    }
    Domain {
        SessionStarted => "sessionStarted",
        SessionUpdated => "sessionUpdated",
        SessionFinished => "sessionFinished",
        ReferenceUpdated => "referenceUpdated",
        LocaleAdded => "localeAdded",
        LocaleUpdated => "localeUpdated",
        LocaleRemoved => "localeRemoved",
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    ConnectionDropped,
    Kicked,
    Banned,
    Timeout,
    ServerShutdown,
    /// Used when a session vanished remotely without a terminal notification.
    Unknown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EndReason::ConnectionDropped => "ConnectionDropped",
            EndReason::Kicked => "Kicked",
            EndReason::Banned => "Banned",
            EndReason::Timeout => "Timeout",
            EndReason::ServerShutdown => "ServerShutdown",
            EndReason::Unknown => "Unknown",
        };
        f.write_str(reason)
    }
}

// ============================================================================
// Native Events
// ============================================================================

/// A player is connecting through the game-engine runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConnecting {
    pub session_id: String,
    pub ip_address: String,
}

/// The game-engine runtime dropped a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDropped {
    pub session_id: String,
    pub reason: EndReason,
}

// ============================================================================
// Push Events
// ============================================================================

/// The backend reports that a session changed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketSessionUpdated {
    pub id: String,
}

/// The backend reports that a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketSessionFinished {
    pub id: String,
    pub end_reason: EndReason,
}

/// The backend reports that a reference data set changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketReferenceUpdated {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketLocaleAdded {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketLocaleUpdated {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketLocaleRemoved {
    pub code: String,
}

// ============================================================================
// Domain Events
// ============================================================================

/// A session is active and holds a backend token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: String,
    pub session_token: String,
}

/// A cached session was refreshed and now carries a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdated {
    pub session_id: String,
    pub user_id: String,
}

/// A session was removed from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFinished {
    pub session_id: String,
    pub end_reason: EndReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceUpdated {
    pub kind: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleAdded {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleUpdated {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleRemoved {
    pub code: String,
}
