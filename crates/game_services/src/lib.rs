//! # Game Services
//!
//! Concrete services for the game server context:
//!
//! - [`SessionService`]: player sessions, from connect to drop
//! - [`ReferenceService`]: versioned reference data sets
//! - [`LocalizationService`]: locales and translation lookup
//!
//! Each keeps an in-memory cache that is loaded in bulk at `init` and then
//! reconciled with push notifications from the engine. The [`api`] module holds
//! the typed engine wrappers, [`MemoryEngine`] is an in-process engine, and
//! [`InboundAdapter`] turns native callbacks and push envelopes into events.

pub mod api;
pub mod error;
pub mod inbound;
pub mod memory_engine;
pub mod services;

pub use error::{DomainError, InboundError, SeedError};
pub use inbound::InboundAdapter;
pub use memory_engine::{EngineSeed, MemoryEngine, DEFAULT_REQUEST_LOG_CAPACITY};
pub use services::{
    CachedSession, LocalizationService, ReferenceService, ServiceKind, SessionService,
    SessionStartHook, SessionState,
};
