use crate::api::EngineError;

/// Configuration and lifecycle errors raised by the context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Cannot add service {service}: context is already initialized")]
    AlreadyInitialized { service: &'static str },
    #[error("Service {service} is not registered")]
    NotRegistered { service: &'static str },
    #[error("Failed to construct service {service}: {source}")]
    Construction {
        service: &'static str,
        #[source]
        source: ServiceError,
    },
    #[error("Service {service} failed to initialize: {source}")]
    ServiceInit {
        service: &'static str,
        #[source]
        source: ServiceError,
    },
    #[error("API cache slot for {api} holds a different type")]
    ApiTypeMismatch { api: &'static str },
    #[error("Server context has been dropped")]
    ContextDropped,
}

impl ContextError {
    /// The service the error is about, if any.
    pub fn service(&self) -> Option<&'static str> {
        match self {
            ContextError::AlreadyInitialized { service }
            | ContextError::NotRegistered { service }
            | ContextError::Construction { service, .. }
            | ContextError::ServiceInit { service, .. } => Some(*service),
            ContextError::ApiTypeMismatch { .. } | ContextError::ContextDropped => None,
        }
    }
}

/// Errors raised by service code.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Domain error: {0}")]
    Domain(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<ContextError> for ServiceError {
    fn from(error: ContextError) -> Self {
        ServiceError::Runtime(error.to_string())
    }
}
