//! # Server Context
//!
//! The dependency-injection core of the game server. A [`ServerContext`] owns
//! the [`EventBus`](event_system::EventBus) and [`HookBus`](event_system::HookBus),
//! resolves [`Service`] singletons and [`EngineApi`] wrappers by type, and drives
//! the ordered `init`/`dispose` lifecycle.
//!
//! Services bind their handler methods declaratively through
//! [`Service::EVENT_BINDINGS`]; see [`service`] for details.

pub mod api;
pub mod context;
pub mod error;
pub mod logging;
pub mod service;
pub mod testing;

pub use api::{decode_response, EngineApi, EngineClient, EngineError, EngineMethod, EngineRequest};
pub use context::{ContextFactory, ContextOptions, ServerContext};
pub use error::{ContextError, ServiceError};
pub use logging::{LogLevel, Logger, TracingLogger};
pub use service::{bind_method, EventBinding, EventMethod, Service, ServiceBase, ServiceLifecycle};

// Services implement `Service` with `#[async_trait]`.
pub use async_trait::async_trait;
