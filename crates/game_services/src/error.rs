use event_system::EventName;
use server_context::EngineError;

/// Errors returned to callers of the game services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Engine error: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for DomainError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::NotFound(what) => DomainError::NotFound(what),
            EngineError::Conflict(what) => DomainError::Conflict(what),
            EngineError::Forbidden(what) => DomainError::Forbidden(what),
            other => DomainError::Engine(other),
        }
    }
}

/// Errors raised while translating inbound stimuli into events.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("Malformed push envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Event {0} does not come from the push channel")]
    NotPushOrigin(EventName),
}

/// Errors raised while loading an engine seed.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse seed: {0}")]
    Parse(#[from] serde_json::Error),
}
