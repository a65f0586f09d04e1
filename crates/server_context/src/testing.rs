//! Helpers for tests that need a context without a real engine.

use crate::api::{EngineClient, EngineError, EngineRequest};
use crate::context::{ContextOptions, ServerContext};
use async_trait::async_trait;
use std::sync::Arc;

pub use crate::logging::MemoryLogger;

/// Engine client that refuses every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEngine;

#[async_trait]
impl EngineClient for NullEngine {
    async fn send(&self, request: EngineRequest) -> Result<serde_json::Value, EngineError> {
        Err(EngineError::Unavailable(format!("no engine for {}", request)))
    }
}

/// A context over `engine` whose logger is captured for assertions.
pub fn context_with_memory_logger(
    engine: Arc<dyn EngineClient>,
) -> (Arc<ServerContext>, Arc<MemoryLogger>) {
    let logger = Arc::new(MemoryLogger::new());
    let context = ServerContext::new(ContextOptions::new(engine).with_logger(logger.clone()));
    (context, logger)
}
