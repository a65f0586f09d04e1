//! Engine client seam and the API wrapper contract.
//!
//! The engine is the backend the server talks to. This crate only knows it as
//! an [`EngineClient`] that answers [`EngineRequest`]s with JSON; typed wrappers
//! implementing [`EngineApi`] live with the services that use them and are
//! obtained through [`ServerContext::get_api`](crate::ServerContext::get_api).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for EngineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self {
            EngineMethod::Get => "GET",
            EngineMethod::Post => "POST",
            EngineMethod::Put => "PUT",
            EngineMethod::Delete => "DELETE",
        };
        f.write_str(method)
    }
}

/// A single call to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub method: EngineMethod,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl EngineRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: EngineMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: EngineMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: EngineMethod::Put,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: EngineMethod::Delete,
            path: path.into(),
            body: None,
        }
    }
}

impl fmt::Display for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Failures reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid engine response: {0}")]
    InvalidResponse(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Transport to the engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn send(&self, request: EngineRequest) -> Result<serde_json::Value, EngineError>;
}

/// A typed wrapper over the engine client.
///
/// The context builds each implementor at most once and caches it.
pub trait EngineApi: Send + Sync + 'static {
    fn new(client: Arc<dyn EngineClient>) -> Self
    where
        Self: Sized;
}

/// Decodes an engine response into `T`.
pub fn decode_response<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, EngineError> {
    serde_json::from_value(value).map_err(|e| EngineError::InvalidResponse(e.to_string()))
}
